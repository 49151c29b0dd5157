// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU client connections

use std::{
    collections::VecDeque,
    fmt, io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    codec::rtu::{encode_request_frame, RtuCodec},
    error::{Error, ProtocolError, Result},
    frame::{rtu::RtuFrame, Request, Response},
    scheduler::{Scheduler, TokioScheduler},
    transport::{FrameHandler, FramedTransport, RtuTransport, StreamConnector},
    unit::Unit,
};

use super::{into_io_error, pending::Pending, ClientConfig, Context, ResponseFuture};

/// The transport used by [`attach()`].
pub type RtuStreamTransport<T> = FramedTransport<StreamConnector<T>, RtuCodec>;

/// Connect to no particular _Modbus_ unit for sending broadcast messages.
pub async fn attach<T>(transport: T) -> io::Result<(Arc<RtuClient<RtuStreamTransport<T>>>, Context)>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    attach_unit(transport, Unit::broadcast()).await
}

/// Connect to any kind of _Modbus_ unit on an already opened serial
/// line or other byte stream.
///
/// The returned engine is also needed for sending broadcasts, which
/// cannot be done through the [`Context`].
pub async fn attach_unit<T>(
    transport: T,
    unit: Unit,
) -> io::Result<(Arc<RtuClient<RtuStreamTransport<T>>>, Context)>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let transport = FramedTransport::new(StreamConnector::new(transport), RtuCodec::client());
    let client = Arc::new(RtuClient::new(
        transport,
        TokioScheduler::current()?,
        ClientConfig::default(),
    ));
    client.connect().await.map_err(into_io_error)?;
    let context = Context::new(Arc::clone(&client) as Arc<dyn super::Client>, unit);
    Ok((client, context))
}

type RequestId = u64;

struct Inner<T> {
    transport: T,
    scheduler: Box<dyn Scheduler>,
    config: ClientConfig,
    next_request_id: AtomicU64,
    pending: Mutex<VecDeque<(RequestId, Pending)>>,
}

impl<T: RtuTransport> Inner<T> {
    fn remove(&self, request_id: RequestId) -> Option<Pending> {
        let mut pending = self.pending.lock();
        let index = pending.iter().position(|(id, _)| *id == request_id)?;
        pending.remove(index).map(|(_, pending)| pending)
    }

    fn on_response(&self, frame: RtuFrame) {
        let mut queue = self.pending.lock();
        let Some((_, pending)) = queue.pop_front() else {
            drop(queue);
            log::warn!(
                "Dropping unexpected response from unit {}: {:02X?}",
                Unit(frame.unit_id),
                &frame.pdu[..]
            );
            return;
        };

        if let Err(expected) = frame.verify_crc() {
            drop(queue);
            log::warn!(
                "Invalid CRC of response from unit {}: expected = 0x{expected:0>4X}, actual = 0x{:0>4X}",
                Unit(frame.unit_id),
                frame.crc
            );
            self.transport.reset_frame_parser();
            pending.complete(Err(ProtocolError::CrcMismatch {
                expected,
                actual: frame.crc,
            }
            .into()));
            return;
        }

        if frame.unit_id != pending.unit_id {
            drop(queue);
            let expected = pending.unit_id;
            pending.complete(Err(ProtocolError::UnitIdMismatch {
                expected,
                actual: frame.unit_id,
            }
            .into()));
            return;
        }

        let function = pending.function;
        let code = frame.function_code();
        if code != Some(function.value()) && code != Some(function.exception_value()) {
            let drained: Vec<_> = queue.drain(..).map(|(_, pending)| pending).collect();
            drop(queue);
            let response = code.unwrap_or_default();
            log::warn!(
                "Out of sync: received function code 0x{response:0>2X} in response to 0x{:0>2X}, failing {} other pending request(s)",
                function.value(),
                drained.len()
            );
            pending.complete(Err(ProtocolError::FunctionCodeMismatch {
                request: function.value(),
                response,
            }
            .into()));
            for other in drained {
                let function = other.function.value();
                other.complete(Err(ProtocolError::Desynchronized { function }.into()));
            }
            return;
        }
        drop(queue);

        let result = pending.resolve(&frame.pdu);
        pending.complete(result);
    }

    fn on_timeout(&self, request_id: RequestId) {
        let Some(pending) = self.remove(request_id) else {
            return;
        };
        let timeout = self.config.request_timeout;
        log::warn!(
            "No response from unit {} within {timeout:?}",
            Unit(pending.unit_id)
        );
        self.transport.reset_frame_parser();
        pending.complete(Err(Error::Timeout(timeout)));
    }

    fn fail_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain(..).map(|(_, p)| p).collect();
        self.transport.reset_frame_parser();
        for pending in drained {
            pending.complete(Err(Error::ConnectionClosed));
        }
    }
}

struct ResponseHandler<T>(Weak<Inner<T>>);

impl<T: RtuTransport> FrameHandler<RtuFrame> for ResponseHandler<T> {
    fn on_frame(&self, frame: RtuFrame) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_response(frame);
        }
    }

    fn on_closed(&self, err: Option<io::Error>) {
        if let Some(err) = &err {
            log::warn!("Connection failed: {err}");
        }
        if let Some(inner) = self.0.upgrade() {
            inner.fail_all();
        }
    }
}

/// _Modbus_ RTU client engine.
///
/// Without a transaction id responses are matched to requests strictly
/// in the order the requests have been sent. A response that doesn't fit
/// the oldest pending request means that request and response stream are
/// out of step. All pending requests are failed in this case.
pub struct RtuClient<T> {
    inner: Arc<Inner<T>>,
}

impl<T> fmt::Debug for RtuClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtuClient")
            .field("config", &self.inner.config)
            .field("pending", &self.inner.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl<T: RtuTransport> RtuClient<T> {
    pub fn new(transport: T, scheduler: impl Scheduler, config: ClientConfig) -> Self {
        let inner = Arc::new(Inner {
            transport,
            scheduler: Box::new(scheduler),
            config,
            next_request_id: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
        });
        inner
            .transport
            .receive(Arc::new(ResponseHandler(Arc::downgrade(&inner))));
        Self { inner }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub async fn connect(&self) -> Result<()> {
        self.inner.transport.reset_frame_parser();
        self.inner.transport.connect().await.map_err(Error::Transport)
    }

    /// Send a request without waiting for the response.
    ///
    /// # Errors
    ///
    /// Fails if not connected, if `unit` is the broadcast address, or if
    /// sending failed.
    pub async fn send_request(&self, unit: Unit, request: Request<'_>) -> Result<ResponseFuture> {
        if unit.is_broadcast() {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::InvalidInput,
                "broadcast requests are not answered, use send_broadcast()",
            )));
        }
        if !self.inner.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        let frame = encode_request_frame(unit.into(), &request).map_err(Error::Transport)?;
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (pending, response) = Pending::new(request.function_code(), unit.into());
        self.inner.pending.lock().push_back((request_id, pending));

        let weak = Arc::downgrade(&self.inner);
        let timeout = self.inner.scheduler.schedule(
            self.inner.config.request_timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_timeout(request_id);
                }
            }),
        );
        match self
            .inner
            .pending
            .lock()
            .iter_mut()
            .find(|(id, _)| *id == request_id)
        {
            Some((_, pending)) => pending.set_timeout(timeout),
            None => timeout.cancel(),
        }

        log::debug!("Sending request to unit {unit}");
        if let Err(err) = self.inner.transport.send(frame).await {
            if let Some(pending) = self.inner.remove(request_id) {
                pending.complete(Err(Error::ConnectionClosed));
            }
            return Err(Error::Transport(err));
        }
        Ok(response)
    }

    /// Send a request to all units without expecting any response.
    pub async fn send_broadcast(&self, request: Request<'_>) -> Result<()> {
        if !self.inner.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        let frame =
            encode_request_frame(Unit::broadcast().into(), &request).map_err(Error::Transport)?;
        log::debug!("Broadcasting {:?} request", request.function_code());
        self.inner
            .transport
            .send(frame)
            .await
            .map_err(Error::Transport)
    }
}

#[async_trait]
impl<T: RtuTransport> super::Client for RtuClient<T> {
    async fn call(&self, unit: Unit, request: Request<'_>) -> Result<Response> {
        self.send_request(unit, request).await?.await
    }

    async fn disconnect(&self) -> Result<()> {
        let res = self.inner.transport.disconnect().await;
        self.inner.fail_all();
        res.map_err(Error::Transport)
    }
}
