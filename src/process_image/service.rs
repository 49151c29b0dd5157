// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;

use async_trait::async_trait;

use crate::{
    error::ServiceError,
    frame::{Address, Coil, ExceptionCode, ExceptionResponse, FunctionCode, Quantity, Word},
    server::{RequestContext, Service},
    unit::{Unit, UnitId},
};

use super::{ProcessImage, Transaction};

const MAX_READ_BITS: Quantity = 2000;
const MAX_READ_REGISTERS: Quantity = 125;
const MAX_WRITE_COILS: Quantity = 1968;
const MAX_WRITE_REGISTERS: Quantity = 123;
const MAX_READ_WRITE_REGISTERS: Quantity = 121;

fn exception(function: FunctionCode, exception: ExceptionCode) -> ServiceError {
    ExceptionResponse::new(function, exception).into()
}

fn check_range(
    function: FunctionCode,
    addr: Address,
    cnt: usize,
    max_cnt: Quantity,
) -> Result<(), ServiceError> {
    if cnt == 0 || cnt > usize::from(max_cnt) {
        return Err(exception(function, ExceptionCode::IllegalDataValue));
    }
    if usize::from(addr) + cnt > usize::from(Address::MAX) + 1 {
        return Err(exception(function, ExceptionCode::IllegalDataAddress));
    }
    Ok(())
}

/// Serves the coils and registers of a [`ProcessImage`].
///
/// Requests with invalid quantities are answered with
/// [`ExceptionCode::IllegalDataValue`], requests beyond the end of the
/// address space with [`ExceptionCode::IllegalDataAddress`].
#[derive(Debug, Clone)]
pub struct ProcessImageService {
    image: ProcessImage,
    units: Option<HashSet<UnitId>>,
}

impl ProcessImageService {
    /// Serve `image` for all units.
    #[must_use]
    pub const fn new(image: ProcessImage) -> Self {
        Self { image, units: None }
    }

    /// Only serve requests for `units`, requests for other units are
    /// not answered.
    #[must_use]
    pub fn with_units(mut self, units: impl IntoIterator<Item = Unit>) -> Self {
        self.units = Some(units.into_iter().map(UnitId::from).collect());
        self
    }

    #[must_use]
    pub const fn image(&self) -> &ProcessImage {
        &self.image
    }

    fn transaction<R>(
        &self,
        unit: Unit,
        f: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> Result<R, ServiceError> {
        if let Some(units) = &self.units {
            if !units.contains(&unit.0) {
                return Err(ServiceError::UnknownUnit(unit.0));
            }
        }
        Ok(self.image.transaction(f)?)
    }
}

#[async_trait]
impl Service for ProcessImageService {
    async fn read_coils(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>, ServiceError> {
        check_range(FunctionCode::ReadCoils, addr, cnt.into(), MAX_READ_BITS)?;
        self.transaction(unit, |tx| tx.read_coils(|coils| coils.get_range(addr, cnt)))
    }

    async fn read_discrete_inputs(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>, ServiceError> {
        check_range(FunctionCode::ReadDiscreteInputs, addr, cnt.into(), MAX_READ_BITS)?;
        self.transaction(unit, |tx| {
            tx.read_discrete_inputs(|inputs| inputs.get_range(addr, cnt))
        })
    }

    async fn read_holding_registers(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, ServiceError> {
        check_range(
            FunctionCode::ReadHoldingRegisters,
            addr,
            cnt.into(),
            MAX_READ_REGISTERS,
        )?;
        self.transaction(unit, |tx| {
            tx.read_holding_registers(|registers| registers.get_range(addr, cnt))
        })
    }

    async fn read_input_registers(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, ServiceError> {
        check_range(
            FunctionCode::ReadInputRegisters,
            addr,
            cnt.into(),
            MAX_READ_REGISTERS,
        )?;
        self.transaction(unit, |tx| {
            tx.read_input_registers(|registers| registers.get_range(addr, cnt))
        })
    }

    async fn write_single_coil(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        coil: Coil,
    ) -> Result<(), ServiceError> {
        self.transaction(unit, |tx| tx.write_coils(|coils| coils.set(addr, coil)))
    }

    async fn write_single_register(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        word: Word,
    ) -> Result<(), ServiceError> {
        self.transaction(unit, |tx| {
            tx.write_holding_registers(|registers| registers.set(addr, word));
        })
    }

    async fn write_multiple_coils(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        coils: &[Coil],
    ) -> Result<(), ServiceError> {
        check_range(
            FunctionCode::WriteMultipleCoils,
            addr,
            coils.len(),
            MAX_WRITE_COILS,
        )?;
        self.transaction(unit, |tx| {
            tx.write_coils(|table| table.set_range(addr, coils));
        })
    }

    async fn write_multiple_registers(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        words: &[Word],
    ) -> Result<(), ServiceError> {
        check_range(
            FunctionCode::WriteMultipleRegisters,
            addr,
            words.len(),
            MAX_WRITE_REGISTERS,
        )?;
        self.transaction(unit, |tx| {
            tx.write_holding_registers(|registers| registers.set_range(addr, words));
        })
    }

    async fn masked_write_register(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<(), ServiceError> {
        self.transaction(unit, |tx| {
            tx.write_holding_registers(|registers| {
                let current = registers.get(addr);
                registers.set(addr, (current & and_mask) | (or_mask & !and_mask));
            });
        })
    }

    async fn read_write_multiple_registers(
        &self,
        _ctx: &RequestContext,
        unit: Unit,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        words: &[Word],
    ) -> Result<Vec<Word>, ServiceError> {
        let function = FunctionCode::ReadWriteMultipleRegisters;
        check_range(function, read_addr, read_cnt.into(), MAX_READ_REGISTERS)?;
        check_range(function, write_addr, words.len(), MAX_READ_WRITE_REGISTERS)?;
        self.transaction(unit, |tx| {
            tx.write_holding_registers(|registers| {
                registers.set_range(write_addr, words);
                registers.get_range(read_addr, read_cnt)
            })
        })
    }
}
