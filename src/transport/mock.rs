// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory transport for engine tests.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{FrameHandler, Transport};

pub(crate) struct MockTransport<F> {
    connected: AtomicBool,
    fail_send: AtomicBool,
    parser_resets: AtomicUsize,
    sent: Mutex<Vec<Bytes>>,
    handler: Mutex<Option<Arc<dyn FrameHandler<F>>>>,
}

impl<F> Default for MockTransport<F> {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            parser_resets: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
        }
    }
}

impl<F: 'static> MockTransport<F> {
    pub(crate) fn fail_next_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub(crate) fn parser_resets(&self) -> usize {
        self.parser_resets.load(Ordering::SeqCst)
    }

    fn handler(&self) -> Arc<dyn FrameHandler<F>> {
        self.handler.lock().clone().expect("no frame handler registered")
    }

    /// Deliver a frame as if received from the remote end.
    pub(crate) fn deliver(&self, frame: F) {
        self.handler().on_frame(frame);
    }

    /// Simulate the remote end closing the connection.
    pub(crate) fn close_remotely(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.handler().on_closed(None);
    }
}

#[async_trait]
impl<F: Send + 'static> Transport for MockTransport<F> {
    type Frame = F;

    async fn connect(&self) -> io::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> io::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: Bytes) -> io::Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    fn receive(&self, handler: Arc<dyn FrameHandler<F>>) {
        *self.handler.lock() = Some(handler);
    }
}

#[cfg(feature = "rtu")]
impl super::RtuTransport for MockTransport<crate::frame::rtu::RtuFrame> {
    fn reset_frame_parser(&self) {
        self.parser_resets.fetch_add(1, Ordering::SeqCst);
    }
}
