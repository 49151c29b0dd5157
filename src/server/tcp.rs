// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server skeleton

use std::{future::Future, io, net::SocketAddr, sync::Arc};

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use tokio_util::codec::Framed;

use crate::{
    codec::{decode_request_pdu, tcp::MbapCodec},
    frame::tcp::{ResponseAdu, TcpFrame},
    unit::Unit,
};

use super::{dispatch, unsupported_function, RequestContext, Service};

/// Answer a single request frame.
///
/// Returns `None` if no response must be sent.
///
/// # Errors
///
/// Fails on malformed requests and on internal service failures. Both
/// should close the connection.
pub async fn handle_frame<S>(
    service: &S,
    ctx: &RequestContext,
    frame: TcpFrame,
) -> io::Result<Option<ResponseAdu>>
where
    S: Service + ?Sized,
{
    let hdr = frame.header.header();
    let request = match decode_request_pdu(&frame.pdu) {
        Ok(request) => request,
        Err(err) => {
            if let Some(exception) = unsupported_function(&frame.pdu) {
                log::debug!("Unsupported function {} in {hdr:?}", exception.function);
                return Ok(Some(ResponseAdu {
                    hdr,
                    pdu: exception.into(),
                }));
            }
            log::warn!("Invalid request {hdr:?}: {err}");
            return Err(err);
        }
    };
    log::debug!("Received {request:?} in {hdr:?}");
    let response = dispatch(service, ctx, Unit(hdr.unit_id), request).await?;
    Ok(response.map(|pdu| ResponseAdu { hdr, pdu }))
}

/// The request-response loop of a single connection.
///
/// Runs until the peer closes the connection.
///
/// # Errors
///
/// Fails on I/O errors, malformed requests, and internal service failures.
pub async fn serve_connection<T, S>(stream: T, service: &S, ctx: RequestContext) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: Service + ?Sized,
{
    let mut framed = Framed::new(stream, MbapCodec::new());
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        match handle_frame(service, &ctx, frame).await? {
            Some(response) => framed.send(response).await?,
            None => log::debug!("No response"),
        }
    }
    Ok(())
}

/// Reason for the termination of [`Server::serve_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminated {
    Finished,
    Aborted,
}

/// Accepts TCP connections and serves them concurrently.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Bind to `socket_addr`.
    ///
    /// The server is unbound when dropped.
    pub async fn bind(socket_addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(socket_addr).await?;
        Ok(Self::new(listener))
    }

    #[must_use]
    pub const fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until accepting fails.
    ///
    /// Each connection is served by its own task. Errors of a single
    /// connection only close that connection.
    pub async fn serve<S>(&self, service: Arc<S>) -> io::Result<()>
    where
        S: Service + ?Sized + 'static,
    {
        loop {
            let (stream, remote_addr) = self.listener.accept().await?;
            let ctx = connection_context(&stream, remote_addr);
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                log::debug!("Accepted connection from {remote_addr}");
                if let Err(err) = serve_connection(stream, service.as_ref(), ctx).await {
                    log::warn!("Closing connection from {remote_addr}: {err}");
                }
            });
        }
    }

    /// Serve connections until `abort_signal` resolves, then unbind.
    pub async fn serve_until<S, X>(self, service: Arc<S>, abort_signal: X) -> io::Result<Terminated>
    where
        S: Service + ?Sized + 'static,
        X: Future<Output = ()>,
    {
        tokio::select! {
            res = self.serve(service) => res.map(|()| Terminated::Finished),
            () = abort_signal => {
                log::debug!("Abort signal received");
                Ok(Terminated::Aborted)
            }
        }
    }
}

fn connection_context(stream: &TcpStream, remote_addr: SocketAddr) -> RequestContext {
    if let Err(err) = stream.set_nodelay(true) {
        log::debug!("Failed to disable Nagle's algorithm: {err}");
    }
    RequestContext {
        local_addr: stream.local_addr().ok(),
        remote_addr: Some(remote_addr),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::{
        error::ServiceError,
        frame::{
            tcp::MbapHeader, Address, ExceptionCode, ExceptionResponse, FunctionCode, Quantity,
            Response, Word,
        },
    };

    use super::*;

    struct Constant;

    #[async_trait]
    impl Service for Constant {
        async fn read_input_registers(
            &self,
            _ctx: &RequestContext,
            unit: Unit,
            _addr: Address,
            cnt: Quantity,
        ) -> Result<Vec<Word>, ServiceError> {
            if unit == Unit(0x99) {
                return Err(ServiceError::UnknownUnit(unit.0));
            }
            Ok(vec![0x33; cnt.into()])
        }
    }

    fn frame(unit_id: u8, pdu: &'static [u8]) -> TcpFrame {
        TcpFrame {
            header: MbapHeader {
                transaction_id: 9,
                protocol_id: 0,
                length: pdu.len() as u16 + 1,
                unit_id,
            },
            pdu: Bytes::from_static(pdu),
        }
    }

    #[tokio::test]
    async fn response_keeps_header() {
        let rsp = handle_frame(
            &Constant,
            &RequestContext::default(),
            frame(7, &[0x04, 0x00, 0x00, 0x00, 0x01]),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(rsp.hdr.transaction_id, 9);
        assert_eq!(rsp.hdr.unit_id, 7);
        assert_eq!(rsp.pdu, Response::ReadInputRegisters(vec![0x33]).into());
    }

    #[tokio::test]
    async fn unsupported_function_code() {
        let rsp = handle_frame(&Constant, &RequestContext::default(), frame(1, &[0x2B, 0x0E]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            rsp.pdu,
            ExceptionResponse::new(FunctionCode::Custom(0x2B), ExceptionCode::IllegalFunction)
                .into()
        );
    }

    #[tokio::test]
    async fn malformed_request() {
        assert!(
            handle_frame(&Constant, &RequestContext::default(), frame(1, &[0x04, 0x00]))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn unknown_unit() {
        let rsp = handle_frame(
            &Constant,
            &RequestContext::default(),
            frame(0x99, &[0x04, 0x00, 0x00, 0x00, 0x01]),
        )
        .await
        .unwrap();
        assert!(rsp.is_none());
    }
}
