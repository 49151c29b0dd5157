// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A transport-agnostic [Modbus](https://en.wikipedia.org/wiki/Modbus)
//! protocol engine based on [tokio](https://tokio.rs).
//!
//! Modbus is based on a [master/slave](https://en.wikipedia.org/wiki/Master/slave_(technology))
//! model.
//! To avoid confusions with the tokio terminology the master is called *client*
//! and the slave is called *server* in this library.
//!
//! The client engines only depend on the [`transport::Transport`]
//! capability. They correlate responses with their requests, either by
//! the MBAP transaction identifier (TCP) or by the order of the requests
//! on the serial line (RTU).
//!
//! Servers are built from a [`server::Service`], optionally wrapped for
//! [authorization](server::AuthorizingService). The
//! [`process_image::ProcessImage`] provides the coils and registers of a
//! server with transactional access.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! modbus-engine = "*"
//! ```
//!
//! ## Features
//!
//! - `tcp`: Modbus TCP client and server
//! - `rtu`: Modbus RTU client and server
//! - `server`: Server side services and the process image service
//! - `sync`: Blocking client contexts

pub mod prelude;

pub mod client;
pub mod codec;
pub mod error;
pub mod frame;
pub mod process_image;
pub mod scheduler;
pub mod transport;
pub mod unit;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "server")]
pub mod server;

pub use self::{
    error::{Error, ProcessImageError, ProtocolError, Result},
    frame::{
        Address, Coil, ExceptionCode, ExceptionResponse, FunctionCode, Quantity, Request,
        RequestPdu, Response, ResponsePdu, Word,
    },
    unit::{Unit, UnitId},
};

#[cfg(feature = "server")]
pub use self::error::ServiceError;
