// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous TCP client connections

use std::{io, net::SocketAddr};

use crate::{client::tcp::connect_unit as async_connect_unit, unit::Unit};

use super::{block_on_with_runtime, Context};

/// Establish a direct connection to a Modbus TCP coupler.
pub fn connect(socket_addr: SocketAddr) -> io::Result<Context> {
    connect_unit(socket_addr, Unit::tcp_device())
}

/// Connect to any kind of Modbus unit, probably through a Modbus TCP/RTU
/// gateway that is forwarding messages to/from the corresponding unit.
pub fn connect_unit(socket_addr: SocketAddr, unit: Unit) -> io::Result<Context> {
    let (runtime, async_ctx) = block_on_with_runtime(async_connect_unit(socket_addr, unit))?;
    Ok(Context { runtime, async_ctx })
}
