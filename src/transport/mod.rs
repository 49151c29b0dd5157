// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capability that client engines consume from a physical transport.
//!
//! Engines never touch sockets or serial ports directly. They send
//! pre-encoded frames and get complete, undecoded frames delivered to
//! their [`FrameHandler`].

use std::{io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

mod framed;

#[cfg(test)]
pub(crate) mod mock;

pub use self::framed::{Connector, FramedTransport, StreamConnector};

#[cfg(feature = "tcp")]
pub use self::framed::TcpConnector;

/// Receives frames from a [`Transport`].
///
/// Frames of one connection are delivered one at a time, but possibly
/// on any thread.
pub trait FrameHandler<F>: Send + Sync + 'static {
    fn on_frame(&self, frame: F);

    /// The connection has been closed by the remote end or failed.
    ///
    /// Not invoked for an explicit [`Transport::disconnect`].
    fn on_closed(&self, err: Option<io::Error>);
}

/// A connection oriented frame transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Frames as split off the byte stream.
    type Frame: Send + 'static;

    async fn connect(&self) -> io::Result<()>;

    async fn disconnect(&self) -> io::Result<()>;

    fn is_connected(&self) -> bool;

    /// Write a complete, encoded frame.
    async fn send(&self, frame: Bytes) -> io::Result<()>;

    /// Register the handler for all received frames, replacing any
    /// previously registered handler.
    fn receive(&self, handler: Arc<dyn FrameHandler<Self::Frame>>);
}

/// A transport for RTU frames.
#[cfg(feature = "rtu")]
pub trait RtuTransport: Transport<Frame = crate::frame::rtu::RtuFrame> {
    /// Discard any partially received frame.
    fn reset_frame_parser(&self);
}
