// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous Modbus context access

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

use std::{future::Future, io};

use super::{
    Client as AsyncClient, Context as AsyncContext, Reader as AsyncReader, UnitContext,
    Writer as AsyncWriter,
};

use crate::{error::Result, frame::*, unit::Unit};

fn block_on_with_runtime<F, T>(future: F) -> io::Result<(tokio::runtime::Runtime, T)>
where
    F: Future<Output = io::Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let value = runtime.block_on(future)?;
    Ok((runtime, value))
}

/// A transport independent synchronous client trait.
pub trait Client: UnitContext {
    fn call(&mut self, request: Request<'_>) -> Result<Response>;

    fn disconnect(&mut self) -> Result<()>;
}

/// A transport independent synchronous reader trait.
pub trait Reader: Client {
    fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;
}

/// A transport independent synchronous writer trait.
pub trait Writer: Client {
    fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;
    fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;
    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;
    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;
    fn masked_write_register(&mut self, addr: Address, and_mask: Word, or_mask: Word)
        -> Result<()>;
}

/// A synchronous Modbus client context.
///
/// Owns a single-threaded runtime that only makes progress while
/// one of the blocking methods is executing.
#[derive(Debug)]
pub struct Context {
    runtime: tokio::runtime::Runtime,
    async_ctx: AsyncContext,
}

impl Context {
    #[must_use]
    pub const fn unit(&self) -> Unit {
        self.async_ctx.unit()
    }
}

impl UnitContext for Context {
    fn set_unit(&mut self, unit: Unit) {
        self.async_ctx.set_unit(unit);
    }
}

impl Client for Context {
    fn call(&mut self, request: Request<'_>) -> Result<Response> {
        let unit = self.async_ctx.unit();
        self.runtime.block_on(self.async_ctx.call(unit, request))
    }

    fn disconnect(&mut self) -> Result<()> {
        self.runtime.block_on(AsyncClient::disconnect(&self.async_ctx))
    }
}

impl Reader for Context {
    fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        self.runtime.block_on(self.async_ctx.read_coils(addr, cnt))
    }

    fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        self.runtime
            .block_on(self.async_ctx.read_discrete_inputs(addr, cnt))
    }

    fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        self.runtime
            .block_on(self.async_ctx.read_input_registers(addr, cnt))
    }

    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        self.runtime
            .block_on(self.async_ctx.read_holding_registers(addr, cnt))
    }

    fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        self.runtime
            .block_on(self.async_ctx.read_write_multiple_registers(
                read_addr, read_count, write_addr, write_data,
            ))
    }
}

impl Writer for Context {
    fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_single_coil(addr, coil))
    }

    fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_multiple_coils(addr, coils))
    }

    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_single_register(addr, word))
    }

    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.write_multiple_registers(addr, words))
    }

    fn masked_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()> {
        self.runtime
            .block_on(self.async_ctx.masked_write_register(addr, and_mask, or_mask))
    }
}
