// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus clients

use std::{borrow::Cow, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    error::{Error, ProtocolError, Result},
    frame::*,
    unit::Unit,
};

mod pending;

pub use self::pending::ResponseFuture;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "sync")]
pub mod sync;

/// Default time to wait for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by all client engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Pending requests fail with [`Error::Timeout`] if no response
    /// arrived within this duration.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Transport independent asynchronous client trait
#[async_trait]
pub trait Client: Send + Sync + Debug {
    /// Invokes a _Modbus_ function on `unit`.
    async fn call(&self, unit: Unit, request: Request<'_>) -> Result<Response>;

    /// Disconnects the client.
    ///
    /// All pending requests fail with [`Error::ConnectionClosed`].
    async fn disconnect(&self) -> Result<()>;
}

/// Switch the [`Unit`] that all further requests are addressed to.
pub trait UnitContext {
    fn set_unit(&mut self, unit: Unit);
}

/// Asynchronous _Modbus_ reader
#[async_trait]
pub trait Reader: Client {
    /// Read multiple coils (0x01)
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    /// Read multiple discrete inputs (0x02)
    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    /// Read multiple holding registers (0x03)
    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    /// Read multiple input registers (0x04)
    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    /// Read and write multiple holding registers (0x17)
    ///
    /// The write operation is performed before the read unlike
    /// the name of the operation might suggest!
    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;
}

/// Asynchronous Modbus writer
#[async_trait]
pub trait Writer: Client {
    /// Write a single coil (0x05)
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;

    /// Write a single holding register (0x06)
    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;

    /// Write multiple coils (0x0F)
    async fn write_multiple_coils(&mut self, addr: Address, coils: &'_ [Coil]) -> Result<()>;

    /// Write multiple holding registers (0x10)
    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;

    /// Set or clear individual bits of a holding register (0x16)
    async fn masked_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()>;
}

/// Asynchronous Modbus client context
///
/// Addresses all requests of the shared client engine to a single unit.
#[derive(Debug, Clone)]
pub struct Context {
    client: Arc<dyn Client>,
    unit: Unit,
}

impl Context {
    pub fn new(client: Arc<dyn Client>, unit: Unit) -> Self {
        Self { client, unit }
    }

    #[must_use]
    pub const fn unit(&self) -> Unit {
        self.unit
    }
}

impl UnitContext for Context {
    fn set_unit(&mut self, unit: Unit) {
        self.unit = unit;
    }
}

#[async_trait]
impl Client for Context {
    async fn call(&self, unit: Unit, request: Request<'_>) -> Result<Response> {
        self.client.call(unit, request).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await
    }
}

pub(crate) fn into_io_error(err: Error) -> std::io::Error {
    match err {
        Error::Transport(err) | Error::Decode(err) => err,
        err => std::io::Error::new(std::io::ErrorKind::Other, err),
    }
}

fn unexpected_response(request: FunctionCode, response: &Response) -> Error {
    ProtocolError::FunctionCodeMismatch {
        request: request.value(),
        response: response.function_code().value(),
    }
    .into()
}

fn check_quantity(function: FunctionCode, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    Err(ProtocolError::QuantityMismatch {
        function: function.value(),
        expected,
        actual,
    }
    .into())
}

/// Coils are transferred in whole bytes, so up to 7 padding bits follow.
fn truncate_coils(
    function: FunctionCode,
    mut coils: Vec<Coil>,
    cnt: Quantity,
) -> Result<Vec<Coil>> {
    let cnt = usize::from(cnt);
    if coils.len() < cnt {
        return Err(ProtocolError::QuantityMismatch {
            function: function.value(),
            expected: cnt,
            actual: coils.len(),
        }
        .into());
    }
    coils.truncate(cnt);
    Ok(coils)
}

fn check_echo(function: FunctionCode, echoed: bool) -> Result<()> {
    if echoed {
        Ok(())
    } else {
        Err(ProtocolError::EchoMismatch {
            function: function.value(),
        }
        .into())
    }
}

#[async_trait]
impl Reader for Context {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        match self.client.call(self.unit, Request::ReadCoils(addr, cnt)).await? {
            Response::ReadCoils(coils) => truncate_coils(FunctionCode::ReadCoils, coils, cnt),
            rsp => Err(unexpected_response(FunctionCode::ReadCoils, &rsp)),
        }
    }

    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        match self
            .client
            .call(self.unit, Request::ReadDiscreteInputs(addr, cnt))
            .await?
        {
            Response::ReadDiscreteInputs(coils) => {
                truncate_coils(FunctionCode::ReadDiscreteInputs, coils, cnt)
            }
            rsp => Err(unexpected_response(FunctionCode::ReadDiscreteInputs, &rsp)),
        }
    }

    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        match self
            .client
            .call(self.unit, Request::ReadHoldingRegisters(addr, cnt))
            .await?
        {
            Response::ReadHoldingRegisters(words) => {
                check_quantity(FunctionCode::ReadHoldingRegisters, cnt.into(), words.len())?;
                Ok(words)
            }
            rsp => Err(unexpected_response(FunctionCode::ReadHoldingRegisters, &rsp)),
        }
    }

    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        match self
            .client
            .call(self.unit, Request::ReadInputRegisters(addr, cnt))
            .await?
        {
            Response::ReadInputRegisters(words) => {
                check_quantity(FunctionCode::ReadInputRegisters, cnt.into(), words.len())?;
                Ok(words)
            }
            rsp => Err(unexpected_response(FunctionCode::ReadInputRegisters, &rsp)),
        }
    }

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        let request = Request::ReadWriteMultipleRegisters(
            read_addr,
            read_count,
            write_addr,
            Cow::Borrowed(write_data),
        );
        match self.client.call(self.unit, request).await? {
            Response::ReadWriteMultipleRegisters(words) => {
                check_quantity(
                    FunctionCode::ReadWriteMultipleRegisters,
                    read_count.into(),
                    words.len(),
                )?;
                Ok(words)
            }
            rsp => Err(unexpected_response(
                FunctionCode::ReadWriteMultipleRegisters,
                &rsp,
            )),
        }
    }
}

#[async_trait]
impl Writer for Context {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        match self
            .client
            .call(self.unit, Request::WriteSingleCoil(addr, coil))
            .await?
        {
            Response::WriteSingleCoil(rsp_addr, rsp_coil) => check_echo(
                FunctionCode::WriteSingleCoil,
                addr == rsp_addr && coil == rsp_coil,
            ),
            rsp => Err(unexpected_response(FunctionCode::WriteSingleCoil, &rsp)),
        }
    }

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        match self
            .client
            .call(self.unit, Request::WriteSingleRegister(addr, word))
            .await?
        {
            Response::WriteSingleRegister(rsp_addr, rsp_word) => check_echo(
                FunctionCode::WriteSingleRegister,
                addr == rsp_addr && word == rsp_word,
            ),
            rsp => Err(unexpected_response(FunctionCode::WriteSingleRegister, &rsp)),
        }
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &'_ [Coil]) -> Result<()> {
        let cnt = coils.len();
        match self
            .client
            .call(self.unit, Request::WriteMultipleCoils(addr, Cow::Borrowed(coils)))
            .await?
        {
            Response::WriteMultipleCoils(rsp_addr, rsp_cnt) => check_echo(
                FunctionCode::WriteMultipleCoils,
                addr == rsp_addr && cnt == usize::from(rsp_cnt),
            ),
            rsp => Err(unexpected_response(FunctionCode::WriteMultipleCoils, &rsp)),
        }
    }

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        let cnt = words.len();
        match self
            .client
            .call(
                self.unit,
                Request::WriteMultipleRegisters(addr, Cow::Borrowed(words)),
            )
            .await?
        {
            Response::WriteMultipleRegisters(rsp_addr, rsp_cnt) => check_echo(
                FunctionCode::WriteMultipleRegisters,
                addr == rsp_addr && cnt == usize::from(rsp_cnt),
            ),
            rsp => Err(unexpected_response(FunctionCode::WriteMultipleRegisters, &rsp)),
        }
    }

    async fn masked_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()> {
        match self
            .client
            .call(self.unit, Request::MaskWriteRegister(addr, and_mask, or_mask))
            .await?
        {
            Response::MaskWriteRegister(rsp_addr, rsp_and_mask, rsp_or_mask) => check_echo(
                FunctionCode::MaskWriteRegister,
                addr == rsp_addr && and_mask == rsp_and_mask && or_mask == rsp_or_mask,
            ),
            rsp => Err(unexpected_response(FunctionCode::MaskWriteRegister, &rsp)),
        }
    }
}
