// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use modbus_engine::{
    client::{Context, Reader as _, Writer as _},
    server::{RequestContext, Service},
    Address, Coil, Error, ExceptionCode, ExceptionResponse, FunctionCode, Quantity, ServiceError,
    Unit, Word,
};

pub struct TestService;

fn exception(function: FunctionCode, exception: ExceptionCode) -> ServiceError {
    ExceptionResponse::new(function, exception).into()
}

#[async_trait]
impl Service for TestService {
    async fn read_coils(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Coil>, ServiceError> {
        Err(exception(FunctionCode::ReadCoils, ExceptionCode::Acknowledge))
    }

    async fn read_discrete_inputs(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Coil>, ServiceError> {
        Err(exception(
            FunctionCode::ReadDiscreteInputs,
            ExceptionCode::GatewayPathUnavailable,
        ))
    }

    async fn write_single_coil(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _coil: Coil,
    ) -> Result<(), ServiceError> {
        Err(exception(
            FunctionCode::WriteSingleCoil,
            ExceptionCode::GatewayTargetDevice,
        ))
    }

    async fn write_multiple_coils(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _coils: &[Coil],
    ) -> Result<(), ServiceError> {
        Err(exception(
            FunctionCode::WriteMultipleCoils,
            ExceptionCode::IllegalDataAddress,
        ))
    }

    async fn read_input_registers(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Word>, ServiceError> {
        Err(exception(
            FunctionCode::ReadInputRegisters,
            ExceptionCode::IllegalDataValue,
        ))
    }

    async fn write_single_register(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _word: Word,
    ) -> Result<(), ServiceError> {
        Err(exception(
            FunctionCode::WriteSingleRegister,
            ExceptionCode::MemoryParityError,
        ))
    }

    async fn write_multiple_registers(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _words: &[Word],
    ) -> Result<(), ServiceError> {
        Err(exception(
            FunctionCode::WriteMultipleRegisters,
            ExceptionCode::ServerDeviceBusy,
        ))
    }

    async fn masked_write_register(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _and_mask: Word,
        _or_mask: Word,
    ) -> Result<(), ServiceError> {
        Err(exception(
            FunctionCode::MaskWriteRegister,
            ExceptionCode::ServerDeviceFailure,
        ))
    }
}

fn assert_exception<T: std::fmt::Debug>(
    result: Result<T, Error>,
    function: FunctionCode,
    code: ExceptionCode,
) {
    match result {
        Err(Error::Exception(rsp)) => assert_eq!(rsp, ExceptionResponse::new(function, code)),
        other => panic!("expected exception {code:?}, got {other:?}"),
    }
}

pub async fn check_client_context(mut ctx: Context) {
    assert_exception(
        ctx.read_coils(0x00, 2).await,
        FunctionCode::ReadCoils,
        ExceptionCode::Acknowledge,
    );
    assert_exception(
        ctx.read_discrete_inputs(0x00, 2).await,
        FunctionCode::ReadDiscreteInputs,
        ExceptionCode::GatewayPathUnavailable,
    );
    assert_exception(
        ctx.write_single_coil(0x00, true).await,
        FunctionCode::WriteSingleCoil,
        ExceptionCode::GatewayTargetDevice,
    );
    assert_exception(
        ctx.write_multiple_coils(0x00, &[true]).await,
        FunctionCode::WriteMultipleCoils,
        ExceptionCode::IllegalDataAddress,
    );
    assert_exception(
        ctx.read_input_registers(0x00, 2).await,
        FunctionCode::ReadInputRegisters,
        ExceptionCode::IllegalDataValue,
    );
    // Not implemented by the service
    assert_exception(
        ctx.read_holding_registers(0x00, 2).await,
        FunctionCode::ReadHoldingRegisters,
        ExceptionCode::IllegalFunction,
    );
    assert_exception(
        ctx.write_single_register(0x00, 42).await,
        FunctionCode::WriteSingleRegister,
        ExceptionCode::MemoryParityError,
    );
    assert_exception(
        ctx.write_multiple_registers(0x00, &[42]).await,
        FunctionCode::WriteMultipleRegisters,
        ExceptionCode::ServerDeviceBusy,
    );
    assert_exception(
        ctx.masked_write_register(0x00, 0, 0).await,
        FunctionCode::MaskWriteRegister,
        ExceptionCode::ServerDeviceFailure,
    );
    assert_exception(
        ctx.read_write_multiple_registers(0x00, 1, 0, &[42]).await,
        FunctionCode::ReadWriteMultipleRegisters,
        ExceptionCode::IllegalFunction,
    );
}
