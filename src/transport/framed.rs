// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt as _};
use parking_lot::{Mutex, RwLock};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf},
    task::JoinHandle,
};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use super::{FrameHandler, Transport};

/// Opens the byte stream of a [`FramedTransport`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn connect(&self) -> io::Result<Self::Stream>;
}

/// Connects to a _Modbus_ TCP server.
#[cfg(feature = "tcp")]
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    socket_addr: std::net::SocketAddr,
}

#[cfg(feature = "tcp")]
impl TcpConnector {
    #[must_use]
    pub const fn new(socket_addr: std::net::SocketAddr) -> Self {
        Self { socket_addr }
    }
}

#[cfg(feature = "tcp")]
#[async_trait]
impl Connector for TcpConnector {
    type Stream = tokio::net::TcpStream;

    async fn connect(&self) -> io::Result<Self::Stream> {
        let stream = tokio::net::TcpStream::connect(self.socket_addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Hands out an already established stream exactly once.
///
/// Useful for serial ports that have been opened elsewhere and for
/// in-memory streams.
pub struct StreamConnector<S> {
    stream: Mutex<Option<S>>,
}

impl<S> StreamConnector<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }
}

impl<S> fmt::Debug for StreamConnector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnector")
            .field("consumed", &self.stream.lock().is_none())
            .finish()
    }
}

#[async_trait]
impl<S> Connector for StreamConnector<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Stream = S;

    async fn connect(&self) -> io::Result<S> {
        self.stream
            .lock()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream already consumed"))
    }
}

type HandlerSlot<F> = Arc<RwLock<Option<Arc<dyn FrameHandler<F>>>>>;

struct Connection<S, D> {
    writer: FramedWrite<WriteHalf<S>, D>,
    reader: JoinHandle<()>,
}

/// [`Transport`] over any byte stream, split into frames by a
/// _tokio-util_ codec.
///
/// Each connection gets its own clone of the codec. Received frames are
/// delivered from a spawned reader task.
pub struct FramedTransport<C: Connector, D: Decoder> {
    connector: C,
    codec: D,
    connection: tokio::sync::Mutex<Option<Connection<C::Stream, D>>>,
    handler: HandlerSlot<<D as Decoder>::Item>,
    connected: Arc<AtomicBool>,
}

impl<C: Connector, D: Decoder> fmt::Debug for FramedTransport<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedTransport")
            .field("connected", &self.connected.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<C, D> FramedTransport<C, D>
where
    C: Connector,
    D: Decoder,
{
    pub fn new(connector: C, codec: D) -> Self {
        Self {
            connector,
            codec,
            connection: tokio::sync::Mutex::new(None),
            handler: Arc::new(RwLock::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The codec that all connections are cloned from.
    pub const fn codec(&self) -> &D {
        &self.codec
    }
}

async fn read_frames<R, D>(
    mut reader: FramedRead<R, D>,
    handler: HandlerSlot<D::Item>,
    connected: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
    D: Decoder<Error = io::Error>,
    D::Item: 'static,
{
    let closed = loop {
        match reader.next().await {
            Some(Ok(frame)) => {
                let handler = handler.read().clone();
                if let Some(handler) = handler {
                    handler.on_frame(frame);
                } else {
                    log::warn!("Dropping received frame without handler");
                }
            }
            Some(Err(err)) => {
                log::debug!("Failed to read frame: {err}");
                break Some(err);
            }
            None => break None,
        }
    };
    connected.store(false, Ordering::Release);
    let handler = handler.read().clone();
    if let Some(handler) = handler {
        handler.on_closed(closed);
    }
}

impl<C: Connector, D: Decoder> Drop for FramedTransport<C, D> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.reader.abort();
        }
    }
}

#[async_trait]
impl<C, D> Transport for FramedTransport<C, D>
where
    C: Connector,
    D: Decoder<Error = io::Error> + Encoder<Bytes, Error = io::Error> + Clone + Send + Sync + 'static,
    <D as Decoder>::Item: Send + 'static,
{
    type Frame = <D as Decoder>::Item;

    async fn connect(&self) -> io::Result<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = connection.take() {
            stale.reader.abort();
        }
        let stream = self.connector.connect().await?;
        let (read_half, write_half): (ReadHalf<C::Stream>, WriteHalf<C::Stream>) =
            tokio::io::split(stream);
        self.connected.store(true, Ordering::Release);
        let reader = tokio::spawn(read_frames(
            FramedRead::new(read_half, self.codec.clone()),
            Arc::clone(&self.handler),
            Arc::clone(&self.connected),
        ));
        *connection = Some(Connection {
            writer: FramedWrite::new(write_half, self.codec.clone()),
            reader,
        });
        log::debug!("Connected");
        Ok(())
    }

    async fn disconnect(&self) -> io::Result<()> {
        let Some(mut connection) = self.connection.lock().await.take() else {
            return Ok(());
        };
        self.connected.store(false, Ordering::Release);
        connection.reader.abort();
        let res = SinkExt::<Bytes>::close(&mut connection.writer).await;
        log::debug!("Disconnected");
        match res {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send(&self, frame: Bytes) -> io::Result<()> {
        if !self.is_connected() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let mut connection = self.connection.lock().await;
        let Some(connection) = connection.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        log::trace!("Sending frame: {:02X?}", &frame[..]);
        connection.writer.send(frame).await
    }

    fn receive(&self, handler: Arc<dyn FrameHandler<Self::Frame>>) {
        *self.handler.write() = Some(handler);
    }
}

#[cfg(feature = "rtu")]
impl<C: Connector> super::RtuTransport for FramedTransport<C, crate::codec::rtu::RtuCodec> {
    fn reset_frame_parser(&self) {
        self.codec.parser().reset();
    }
}
