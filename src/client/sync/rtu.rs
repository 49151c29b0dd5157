// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous RTU client connections

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{client::rtu::attach_unit as async_attach_unit, unit::Unit};

use super::{block_on_with_runtime, Context};

/// Connect to any kind of Modbus unit on an already opened serial line.
///
/// The stream is driven by the runtime of the returned context. It must
/// not be bound to another runtime.
pub fn attach_unit<T>(transport: T, unit: Unit) -> io::Result<Context>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (runtime, (_client, async_ctx)) =
        block_on_with_runtime(async_attach_unit(transport, unit))?;
    Ok(Context { runtime, async_ctx })
}
