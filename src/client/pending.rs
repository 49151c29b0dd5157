// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlation records shared by the client engines.

use std::{
    fmt,
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::{
    codec::decode_response_pdu,
    error::{Error, ProtocolError, Result},
    frame::{FunctionCode, Response},
    scheduler::TimeoutHandle,
    unit::UnitId,
};

/// A request that awaits its response.
pub(crate) struct Pending {
    pub(crate) function: FunctionCode,
    pub(crate) unit_id: UnitId,
    tx: oneshot::Sender<Result<Response>>,
    timeout: Option<Box<dyn TimeoutHandle>>,
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("function", &self.function)
            .field("unit_id", &self.unit_id)
            .finish_non_exhaustive()
    }
}

impl Pending {
    pub(crate) fn new(function: FunctionCode, unit_id: UnitId) -> (Self, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            function,
            unit_id,
            tx,
            timeout: None,
        };
        (pending, ResponseFuture { rx })
    }

    pub(crate) fn set_timeout(&mut self, timeout: Box<dyn TimeoutHandle>) {
        debug_assert!(self.timeout.is_none());
        self.timeout = Some(timeout);
    }

    /// Resolve the response future and cancel the timeout.
    pub(crate) fn complete(self, result: Result<Response>) {
        let Self { tx, timeout, .. } = self;
        if let Some(timeout) = timeout {
            timeout.cancel();
        }
        if tx.send(result).is_err() {
            log::debug!("Response future has been dropped");
        }
    }

    /// Check the received PDU against the request and decode it.
    pub(crate) fn resolve(&self, pdu: &[u8]) -> Result<Response> {
        resolve_response(self.function, pdu)
    }
}

fn resolve_response(function: FunctionCode, pdu: &[u8]) -> Result<Response> {
    let Some(&code) = pdu.first() else {
        return Err(Error::Decode(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "empty response PDU",
        )));
    };
    if code != function.value() && code != function.exception_value() {
        return Err(ProtocolError::FunctionCodeMismatch {
            request: function.value(),
            response: code,
        }
        .into());
    }
    let pdu = decode_response_pdu(pdu).map_err(Error::Decode)?;
    pdu.0.map_err(Error::Exception)
}

/// The eventual response of a request that has been sent.
///
/// Resolves with [`Error::ConnectionClosed`] if the client engine is
/// dropped before the request completes.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Result<Response>>,
}

impl Future for ResponseFuture {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Err(Error::ConnectionClosed)))
    }
}
