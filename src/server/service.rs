// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::ServiceError,
    frame::{
        Address, Coil, ExceptionCode, ExceptionResponse, FunctionCode, Quantity, Request,
        Response, ResponsePdu, Word,
    },
    unit::Unit,
};

/// What the transport knows about the peer of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,

    /// DER encoded certificate chain of an authenticated peer.
    pub peer_certificates: Vec<Bytes>,

    /// Role of an authenticated peer, e.g. extracted from its certificate.
    pub role: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

fn not_supported(function: FunctionCode) -> ServiceError {
    ExceptionResponse::new(function, ExceptionCode::IllegalFunction).into()
}

/// A Modbus server service.
///
/// Every function that is not overridden responds with
/// [`ExceptionCode::IllegalFunction`].
///
/// Handlers fail with [`ServiceError::Exception`] to send an exception
/// response, with [`ServiceError::UnknownUnit`] to not respond at all,
/// and with [`ServiceError::Internal`] to close the connection.
#[async_trait]
pub trait Service: Send + Sync {
    /// Read multiple coils (0x01)
    async fn read_coils(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Coil>, ServiceError> {
        Err(not_supported(FunctionCode::ReadCoils))
    }

    /// Read multiple discrete inputs (0x02)
    async fn read_discrete_inputs(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Coil>, ServiceError> {
        Err(not_supported(FunctionCode::ReadDiscreteInputs))
    }

    /// Read multiple holding registers (0x03)
    async fn read_holding_registers(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Word>, ServiceError> {
        Err(not_supported(FunctionCode::ReadHoldingRegisters))
    }

    /// Read multiple input registers (0x04)
    async fn read_input_registers(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _cnt: Quantity,
    ) -> Result<Vec<Word>, ServiceError> {
        Err(not_supported(FunctionCode::ReadInputRegisters))
    }

    /// Write a single coil (0x05)
    async fn write_single_coil(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _coil: Coil,
    ) -> Result<(), ServiceError> {
        Err(not_supported(FunctionCode::WriteSingleCoil))
    }

    /// Write a single holding register (0x06)
    async fn write_single_register(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _word: Word,
    ) -> Result<(), ServiceError> {
        Err(not_supported(FunctionCode::WriteSingleRegister))
    }

    /// Write multiple coils (0x0F)
    async fn write_multiple_coils(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _coils: &[Coil],
    ) -> Result<(), ServiceError> {
        Err(not_supported(FunctionCode::WriteMultipleCoils))
    }

    /// Write multiple holding registers (0x10)
    async fn write_multiple_registers(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _words: &[Word],
    ) -> Result<(), ServiceError> {
        Err(not_supported(FunctionCode::WriteMultipleRegisters))
    }

    /// Set or clear individual bits of a holding register (0x16)
    async fn masked_write_register(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _addr: Address,
        _and_mask: Word,
        _or_mask: Word,
    ) -> Result<(), ServiceError> {
        Err(not_supported(FunctionCode::MaskWriteRegister))
    }

    /// Write, then read multiple holding registers (0x17)
    async fn read_write_multiple_registers(
        &self,
        _ctx: &RequestContext,
        _unit: Unit,
        _read_addr: Address,
        _read_cnt: Quantity,
        _write_addr: Address,
        _words: &[Word],
    ) -> Result<Vec<Word>, ServiceError> {
        Err(not_supported(FunctionCode::ReadWriteMultipleRegisters))
    }
}

fn check_len<T>(function: FunctionCode, values: Vec<T>, cnt: Quantity) -> Result<Vec<T>, ServiceError> {
    if values.len() == usize::from(cnt) {
        return Ok(values);
    }
    Err(ServiceError::Internal(
        format!(
            "service returned {} instead of {cnt} values for function {function}",
            values.len()
        )
        .into(),
    ))
}

#[allow(clippy::cast_possible_truncation)]
async fn call<S>(
    service: &S,
    ctx: &RequestContext,
    unit: Unit,
    request: Request<'_>,
) -> Result<Response, ServiceError>
where
    S: Service + ?Sized,
{
    use Request::*;

    let function = request.function_code();
    let response = match request {
        ReadCoils(addr, cnt) => {
            let coils = service.read_coils(ctx, unit, addr, cnt).await?;
            Response::ReadCoils(check_len(function, coils, cnt)?)
        }
        ReadDiscreteInputs(addr, cnt) => {
            let inputs = service.read_discrete_inputs(ctx, unit, addr, cnt).await?;
            Response::ReadDiscreteInputs(check_len(function, inputs, cnt)?)
        }
        ReadHoldingRegisters(addr, cnt) => {
            let words = service.read_holding_registers(ctx, unit, addr, cnt).await?;
            Response::ReadHoldingRegisters(check_len(function, words, cnt)?)
        }
        ReadInputRegisters(addr, cnt) => {
            let words = service.read_input_registers(ctx, unit, addr, cnt).await?;
            Response::ReadInputRegisters(check_len(function, words, cnt)?)
        }
        WriteSingleCoil(addr, coil) => {
            service.write_single_coil(ctx, unit, addr, coil).await?;
            Response::WriteSingleCoil(addr, coil)
        }
        WriteSingleRegister(addr, word) => {
            service.write_single_register(ctx, unit, addr, word).await?;
            Response::WriteSingleRegister(addr, word)
        }
        WriteMultipleCoils(addr, coils) => {
            service.write_multiple_coils(ctx, unit, addr, &coils).await?;
            Response::WriteMultipleCoils(addr, coils.len() as Quantity)
        }
        WriteMultipleRegisters(addr, words) => {
            service.write_multiple_registers(ctx, unit, addr, &words).await?;
            Response::WriteMultipleRegisters(addr, words.len() as Quantity)
        }
        MaskWriteRegister(addr, and_mask, or_mask) => {
            service
                .masked_write_register(ctx, unit, addr, and_mask, or_mask)
                .await?;
            Response::MaskWriteRegister(addr, and_mask, or_mask)
        }
        ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, words) => {
            let words = service
                .read_write_multiple_registers(ctx, unit, read_addr, read_cnt, write_addr, &words)
                .await?;
            Response::ReadWriteMultipleRegisters(check_len(function, words, read_cnt)?)
        }
    };
    Ok(response)
}

/// Invoke the [`Service`] method that handles `request`.
///
/// Returns `None` if the service doesn't know `unit`, in which case no
/// response must be sent.
///
/// # Errors
///
/// Internal service failures are returned as [`io::Error`] and should
/// close the connection.
pub async fn dispatch<S>(
    service: &S,
    ctx: &RequestContext,
    unit: Unit,
    request: Request<'_>,
) -> io::Result<Option<ResponsePdu>>
where
    S: Service + ?Sized,
{
    match call(service, ctx, unit, request).await {
        Ok(response) => Ok(Some(response.into())),
        Err(ServiceError::Exception(exception)) => {
            log::debug!("Responding to unit {unit} with exception: {exception}");
            Ok(Some(exception.into()))
        }
        Err(ServiceError::UnknownUnit(unit_id)) => {
            log::debug!("Ignoring request for unknown unit {}", Unit(unit_id));
            Ok(None)
        }
        Err(ServiceError::Internal(err)) => {
            log::error!("Service failed: {err}");
            Err(io::Error::new(io::ErrorKind::Other, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Registers {
        words: Mutex<Vec<Word>>,
    }

    #[async_trait]
    impl Service for Registers {
        async fn read_holding_registers(
            &self,
            _ctx: &RequestContext,
            unit: Unit,
            addr: Address,
            cnt: Quantity,
        ) -> Result<Vec<Word>, ServiceError> {
            if unit != Unit(1) {
                return Err(ServiceError::UnknownUnit(unit.0));
            }
            let words = self.words.lock();
            let range = usize::from(addr)..usize::from(addr) + usize::from(cnt);
            words.get(range).map(<[Word]>::to_vec).ok_or_else(|| {
                ExceptionResponse::new(
                    FunctionCode::ReadHoldingRegisters,
                    ExceptionCode::IllegalDataAddress,
                )
                .into()
            })
        }

        async fn write_multiple_registers(
            &self,
            _ctx: &RequestContext,
            _unit: Unit,
            addr: Address,
            words: &[Word],
        ) -> Result<(), ServiceError> {
            let mut registers = self.words.lock();
            let end = usize::from(addr) + words.len();
            if registers.len() < end {
                registers.resize(end, 0);
            }
            registers[usize::from(addr)..end].copy_from_slice(words);
            Ok(())
        }

        async fn read_input_registers(
            &self,
            _ctx: &RequestContext,
            _unit: Unit,
            _addr: Address,
            _cnt: Quantity,
        ) -> Result<Vec<Word>, ServiceError> {
            Err(ServiceError::Internal("broken".into()))
        }

        async fn read_coils(
            &self,
            _ctx: &RequestContext,
            _unit: Unit,
            _addr: Address,
            _cnt: Quantity,
        ) -> Result<Vec<Coil>, ServiceError> {
            Ok(vec![true])
        }
    }

    #[tokio::test]
    async fn dispatch_to_handlers() {
        let service = Registers::default();
        let ctx = RequestContext::default();
        let rsp = dispatch(
            &service,
            &ctx,
            Unit(1),
            Request::WriteMultipleRegisters(2, Cow::Borrowed(&[7, 8])),
        )
        .await
        .unwrap();
        assert_eq!(rsp, Some(Response::WriteMultipleRegisters(2, 2).into()));
        let rsp = dispatch(&service, &ctx, Unit(1), Request::ReadHoldingRegisters(1, 3))
            .await
            .unwrap();
        assert_eq!(
            rsp,
            Some(Response::ReadHoldingRegisters(vec![0, 7, 8]).into())
        );
    }

    #[tokio::test]
    async fn exception_response() {
        let service = Registers::default();
        let rsp = dispatch(
            &service,
            &RequestContext::default(),
            Unit(1),
            Request::ReadHoldingRegisters(0, 1),
        )
        .await
        .unwrap();
        assert_eq!(
            rsp,
            Some(
                ExceptionResponse::new(
                    FunctionCode::ReadHoldingRegisters,
                    ExceptionCode::IllegalDataAddress
                )
                .into()
            )
        );
    }

    #[tokio::test]
    async fn unimplemented_function() {
        let service = Registers::default();
        let rsp = dispatch(
            &service,
            &RequestContext::default(),
            Unit(1),
            Request::MaskWriteRegister(0, 0xFF00, 0x00FF),
        )
        .await
        .unwrap();
        assert_eq!(
            rsp,
            Some(
                ExceptionResponse::new(
                    FunctionCode::MaskWriteRegister,
                    ExceptionCode::IllegalFunction
                )
                .into()
            )
        );
    }

    #[tokio::test]
    async fn unknown_unit_is_not_answered() {
        let service = Registers::default();
        let rsp = dispatch(
            &service,
            &RequestContext::default(),
            Unit(2),
            Request::ReadHoldingRegisters(0, 1),
        )
        .await
        .unwrap();
        assert!(rsp.is_none());
    }

    #[tokio::test]
    async fn internal_errors() {
        let service = Registers::default();
        let ctx = RequestContext::default();
        assert!(
            dispatch(&service, &ctx, Unit(1), Request::ReadInputRegisters(0, 1))
                .await
                .is_err()
        );
        // too few values
        assert!(dispatch(&service, &ctx, Unit(1), Request::ReadCoils(0, 2))
            .await
            .is_err());
    }
}
