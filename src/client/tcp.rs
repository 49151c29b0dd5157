// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client connections

use std::{
    collections::HashMap,
    fmt, io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Weak,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    codec::tcp::{encode_request_frame, MbapCodec},
    error::{Error, Result},
    frame::{
        tcp::{Header, TcpFrame, TransactionId},
        Request, Response,
    },
    scheduler::{Scheduler, TokioScheduler},
    transport::{FrameHandler, FramedTransport, TcpConnector, Transport},
    unit::Unit,
};

use super::{into_io_error, pending::Pending, ClientConfig, Context, ResponseFuture};

/// The transport used by [`connect()`].
pub type TcpTransport = FramedTransport<TcpConnector, MbapCodec>;

/// Establish a direct connection to a Modbus TCP coupler.
pub async fn connect(socket_addr: SocketAddr) -> io::Result<Context> {
    connect_unit(socket_addr, Unit::tcp_device()).await
}

/// Connect to a physical, broadcast, or custom Modbus device,
/// probably through a Modbus TCP gateway that is forwarding
/// messages to/from the corresponding unit.
pub async fn connect_unit(socket_addr: SocketAddr, unit: Unit) -> io::Result<Context> {
    let transport = FramedTransport::new(TcpConnector::new(socket_addr), MbapCodec::new());
    let client = TcpClient::new(
        transport,
        TokioScheduler::current()?,
        ClientConfig::default(),
    );
    client.connect().await.map_err(into_io_error)?;
    Ok(Context::new(Arc::new(client), unit))
}

struct Inner<T> {
    transport: T,
    scheduler: Box<dyn Scheduler>,
    config: ClientConfig,
    next_transaction_id: AtomicU16,
    pending: Mutex<HashMap<TransactionId, Pending>>,
}

impl<T> Inner<T> {
    fn next_transaction_id(&self) -> TransactionId {
        // wraps around on overflow
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Store the request under the next transaction id that is not in use.
    fn register(&self, pending: Pending) -> Result<TransactionId> {
        let mut requests = self.pending.lock();
        if requests.len() > usize::from(TransactionId::MAX) {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::WouldBlock,
                "all transaction ids are in use",
            )));
        }
        let transaction_id = loop {
            let transaction_id = self.next_transaction_id();
            if !requests.contains_key(&transaction_id) {
                break transaction_id;
            }
            log::debug!("Skipping transaction id {transaction_id} that is still pending");
        };
        requests.insert(transaction_id, pending);
        Ok(transaction_id)
    }

    fn complete(&self, transaction_id: TransactionId, result: Result<Response>) -> bool {
        let pending = self.pending.lock().remove(&transaction_id);
        if let Some(pending) = pending {
            pending.complete(result);
            true
        } else {
            false
        }
    }

    fn on_response(&self, frame: TcpFrame) {
        let transaction_id = frame.header.transaction_id;
        let pending = self.pending.lock().remove(&transaction_id);
        let Some(pending) = pending else {
            log::warn!(
                "Dropping late or unknown response with transaction id {transaction_id}: {:02X?}",
                &frame.pdu[..]
            );
            return;
        };
        let result = pending.resolve(&frame.pdu);
        if let Err(err) = &result {
            log::debug!("Request with transaction id {transaction_id} failed: {err}");
        }
        pending.complete(result);
    }

    fn on_timeout(&self, transaction_id: TransactionId) {
        let timeout = self.config.request_timeout;
        if self.complete(transaction_id, Err(Error::Timeout(timeout))) {
            log::warn!("No response for transaction id {transaction_id} within {timeout:?}");
        }
    }

    fn fail_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            log::debug!("Failing {} pending request(s)", drained.len());
        }
        for pending in drained {
            pending.complete(Err(Error::ConnectionClosed));
        }
    }
}

struct ResponseHandler<T>(Weak<Inner<T>>);

impl<T: Send + Sync + 'static> FrameHandler<TcpFrame> for ResponseHandler<T> {
    fn on_frame(&self, frame: TcpFrame) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_response(frame);
        }
    }

    fn on_closed(&self, err: Option<io::Error>) {
        if let Some(err) = &err {
            log::warn!("Connection failed: {err}");
        } else {
            log::debug!("Connection closed by server");
        }
        if let Some(inner) = self.0.upgrade() {
            inner.fail_all();
        }
    }
}

/// _Modbus_ TCP client engine.
///
/// Requests are correlated with their responses by transaction id, so any
/// number of requests may be outstanding at the same time and responses may
/// arrive in any order.
pub struct TcpClient<T> {
    inner: Arc<Inner<T>>,
}

impl<T> fmt::Debug for TcpClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpClient")
            .field("config", &self.inner.config)
            .field("pending", &self.inner.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl<T> TcpClient<T>
where
    T: Transport<Frame = TcpFrame>,
{
    pub fn new(transport: T, scheduler: impl Scheduler, config: ClientConfig) -> Self {
        let inner = Arc::new(Inner {
            transport,
            scheduler: Box::new(scheduler),
            config,
            next_transaction_id: AtomicU16::new(0),
            pending: Mutex::new(HashMap::new()),
        });
        inner
            .transport
            .receive(Arc::new(ResponseHandler(Arc::downgrade(&inner))));
        Self { inner }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Number of requests that are awaiting their response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub async fn connect(&self) -> Result<()> {
        self.inner.transport.connect().await.map_err(Error::Transport)
    }

    /// Send a request without waiting for the response.
    ///
    /// # Errors
    ///
    /// Fails if not connected or if sending failed. All other failures
    /// are reported by the returned future.
    pub async fn send_request(&self, unit: Unit, request: Request<'_>) -> Result<ResponseFuture> {
        if !self.inner.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        let (pending, response) = Pending::new(request.function_code(), unit.into());
        let transaction_id = self.inner.register(pending)?;
        let hdr = Header {
            transaction_id,
            unit_id: unit.into(),
        };
        let frame = match encode_request_frame(hdr, &request) {
            Ok(frame) => frame,
            Err(err) => {
                self.inner.pending.lock().remove(&transaction_id);
                return Err(Error::Transport(err));
            }
        };

        let weak = Arc::downgrade(&self.inner);
        let timeout = self.inner.scheduler.schedule(
            self.inner.config.request_timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_timeout(transaction_id);
                }
            }),
        );
        match self.inner.pending.lock().get_mut(&transaction_id) {
            Some(pending) => pending.set_timeout(timeout),
            // already completed
            None => timeout.cancel(),
        }

        log::debug!("Sending request with transaction id {transaction_id} to unit {unit}");
        if let Err(err) = self.inner.transport.send(frame).await {
            log::debug!("Failed to send request with transaction id {transaction_id}: {err}");
            let pending = self.inner.pending.lock().remove(&transaction_id);
            if let Some(pending) = pending {
                pending.complete(Err(Error::ConnectionClosed));
            }
            return Err(Error::Transport(err));
        }
        Ok(response)
    }
}

#[async_trait]
impl<T> super::Client for TcpClient<T>
where
    T: Transport<Frame = TcpFrame>,
{
    async fn call(&self, unit: Unit, request: Request<'_>) -> Result<Response> {
        self.send_request(unit, request).await?.await
    }

    async fn disconnect(&self) -> Result<()> {
        let res = self.inner.transport.disconnect().await;
        self.inner.fail_all();
        res.map_err(Error::Transport)
    }
}

#[cfg(test)]
mod tests {
    use std::{borrow::Cow, time::Duration};

    use bytes::Bytes;

    use crate::{
        client::Client as _,
        error::ProtocolError,
        frame::{tcp::MbapHeader, ExceptionCode, ExceptionResponse, FunctionCode},
        scheduler::manual::ManualScheduler,
        transport::mock::MockTransport,
    };

    use super::*;

    fn response_frame(transaction_id: TransactionId, pdu: &'static [u8]) -> TcpFrame {
        TcpFrame {
            header: MbapHeader {
                transaction_id,
                protocol_id: 0,
                length: pdu.len() as u16 + 1,
                unit_id: 0xFF,
            },
            pdu: Bytes::from_static(pdu),
        }
    }

    async fn connected_client() -> (TcpClient<MockTransport<TcpFrame>>, ManualScheduler) {
        let scheduler = ManualScheduler::default();
        let client = TcpClient::new(
            MockTransport::default(),
            scheduler.clone(),
            ClientConfig::default().with_request_timeout(Duration::from_millis(100)),
        );
        client.connect().await.unwrap();
        (client, scheduler)
    }

    #[tokio::test]
    async fn not_connected() {
        let client = TcpClient::new(
            MockTransport::default(),
            ManualScheduler::default(),
            ClientConfig::default(),
        );
        let err = client
            .call(Unit(1), Request::ReadCoils(0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn transaction_ids_are_consecutive() {
        let (client, _scheduler) = connected_client().await;
        let _first = client
            .send_request(Unit(1), Request::ReadHoldingRegisters(0x082B, 2))
            .await
            .unwrap();
        let _second = client
            .send_request(Unit(2), Request::WriteSingleCoil(1, true))
            .await
            .unwrap();
        let sent = client.transport().sent();
        assert_eq!(
            &sent[0][..],
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x08, 0x2B, 0x00, 0x02]
        );
        assert_eq!(
            &sent[1][..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x05, 0x00, 0x01, 0xFF, 0x00]
        );
        assert_eq!(client.pending_requests(), 2);
    }

    #[tokio::test]
    async fn transaction_id_wraps_around() {
        let (client, _scheduler) = connected_client().await;
        client
            .inner
            .next_transaction_id
            .store(u16::MAX, Ordering::Relaxed);
        let _last = client
            .send_request(Unit(1), Request::ReadCoils(0, 1))
            .await
            .unwrap();
        let _first = client
            .send_request(Unit(1), Request::ReadCoils(0, 1))
            .await
            .unwrap();
        let sent = client.transport().sent();
        assert_eq!(&sent[0][..2], &[0xFF, 0xFF]);
        assert_eq!(&sent[1][..2], &[0x00, 0x00]);
    }

    #[tokio::test]
    async fn transaction_id_in_use_is_skipped_after_wrap_around() {
        let (client, scheduler) = connected_client().await;
        client.inner.next_transaction_id.store(5, Ordering::Relaxed);
        let first = client
            .send_request(Unit(1), Request::ReadHoldingRegisters(0, 1))
            .await
            .unwrap();
        // the counter came around while the first request is outstanding
        client.inner.next_transaction_id.store(5, Ordering::Relaxed);
        let second = client
            .send_request(Unit(1), Request::ReadInputRegisters(0, 1))
            .await
            .unwrap();
        let sent = client.transport().sent();
        assert_eq!(&sent[0][..2], &[0x00, 0x05]);
        assert_eq!(&sent[1][..2], &[0x00, 0x06]);
        assert_eq!(client.pending_requests(), 2);

        // the timeout of the first request must not touch the second one
        scheduler.fire(0);
        assert!(matches!(first.await, Err(Error::Timeout(_))));
        assert_eq!(client.pending_requests(), 1);
        assert_eq!(scheduler.pending(), 1);

        client
            .transport()
            .deliver(response_frame(6, &[0x04, 0x02, 0x00, 0x2A]));
        assert_eq!(
            second.await.unwrap(),
            Response::ReadInputRegisters(vec![0x002A])
        );
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn all_transaction_ids_in_use() {
        let (client, _scheduler) = connected_client().await;
        {
            let mut requests = client.inner.pending.lock();
            for transaction_id in 0..=TransactionId::MAX {
                let (pending, _response) = Pending::new(FunctionCode::ReadCoils, 1);
                requests.insert(transaction_id, pending);
            }
        }
        let err = client
            .send_request(Unit(1), Request::ReadCoils(0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(err) if err.kind() == io::ErrorKind::WouldBlock));
        assert!(client.transport().sent().is_empty());
    }

    #[tokio::test]
    async fn responses_out_of_order() {
        let (client, scheduler) = connected_client().await;
        let first = client
            .send_request(Unit(1), Request::ReadHoldingRegisters(0, 1))
            .await
            .unwrap();
        let second = client
            .send_request(Unit(1), Request::ReadInputRegisters(0, 1))
            .await
            .unwrap();
        client
            .transport()
            .deliver(response_frame(1, &[0x04, 0x02, 0x00, 0x02]));
        client
            .transport()
            .deliver(response_frame(0, &[0x03, 0x02, 0x00, 0x01]));
        assert_eq!(
            second.await.unwrap(),
            Response::ReadInputRegisters(vec![0x0002])
        );
        assert_eq!(
            first.await.unwrap(),
            Response::ReadHoldingRegisters(vec![0x0001])
        );
        assert_eq!(client.pending_requests(), 0);
        // timeouts have been cancelled
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn exception_response() {
        let (client, _scheduler) = connected_client().await;
        let response = client
            .send_request(Unit(1), Request::ReadCoils(0x10, 8))
            .await
            .unwrap();
        client.transport().deliver(response_frame(0, &[0x81, 0x02]));
        match response.await.unwrap_err() {
            Error::Exception(rsp) => assert_eq!(
                rsp,
                ExceptionResponse::new(FunctionCode::ReadCoils, ExceptionCode::IllegalDataAddress)
            ),
            err => panic!("unexpected error: {err}"),
        }
    }

    #[tokio::test]
    async fn function_code_mismatch() {
        let (client, _scheduler) = connected_client().await;
        let response = client
            .send_request(
                Unit(1),
                Request::WriteMultipleRegisters(0, Cow::Borrowed(&[1, 2])),
            )
            .await
            .unwrap();
        client
            .transport()
            .deliver(response_frame(0, &[0x06, 0x00, 0x00, 0x00, 0x01]));
        assert!(matches!(
            response.await.unwrap_err(),
            Error::Protocol(ProtocolError::FunctionCodeMismatch {
                request: 0x10,
                response: 0x06
            })
        ));
    }

    #[tokio::test]
    async fn timeout_and_late_response() {
        let (client, scheduler) = connected_client().await;
        let response = client
            .send_request(Unit(1), Request::ReadHoldingRegisters(0, 1))
            .await
            .unwrap();
        scheduler.fire_all();
        assert!(matches!(
            response.await.unwrap_err(),
            Error::Timeout(timeout) if timeout == Duration::from_millis(100)
        ));
        assert_eq!(client.pending_requests(), 0);
        // dropped
        client
            .transport()
            .deliver(response_frame(0, &[0x03, 0x02, 0x00, 0x01]));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn unknown_transaction_id_is_dropped() {
        let (client, _scheduler) = connected_client().await;
        let response = client
            .send_request(Unit(1), Request::ReadHoldingRegisters(0, 1))
            .await
            .unwrap();
        client
            .transport()
            .deliver(response_frame(0x4711, &[0x03, 0x02, 0x00, 0x01]));
        assert_eq!(client.pending_requests(), 1);
        client
            .transport()
            .deliver(response_frame(0, &[0x03, 0x02, 0x00, 0x07]));
        assert_eq!(
            response.await.unwrap(),
            Response::ReadHoldingRegisters(vec![7])
        );
    }

    #[tokio::test]
    async fn send_failure_removes_pending_request() {
        let (client, scheduler) = connected_client().await;
        client.transport().fail_next_sends(true);
        let err = client
            .call(Unit(1), Request::ReadCoils(0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(client.pending_requests(), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn disconnect_fails_pending_requests() {
        let (client, scheduler) = connected_client().await;
        let first = client
            .send_request(Unit(1), Request::ReadCoils(0, 1))
            .await
            .unwrap();
        let second = client
            .send_request(Unit(1), Request::ReadCoils(1, 1))
            .await
            .unwrap();
        client.disconnect().await.unwrap();
        assert!(matches!(first.await, Err(Error::ConnectionClosed)));
        assert!(matches!(second.await, Err(Error::ConnectionClosed)));
        assert_eq!(scheduler.pending(), 0);
        assert!(matches!(
            client.call(Unit(1), Request::ReadCoils(0, 1)).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn remote_close_fails_pending_requests() {
        let (client, _scheduler) = connected_client().await;
        let response = client
            .send_request(Unit(1), Request::ReadCoils(0, 1))
            .await
            .unwrap();
        client.transport().close_remotely();
        assert!(matches!(response.await, Err(Error::ConnectionClosed)));
    }
}
