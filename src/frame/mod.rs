// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

use std::{
    borrow::Cow,
    error,
    fmt::{self, Display},
};

/// The first byte of every PDU.
///
/// The named codes are the ones the codec decodes into a [`Request`] or
/// [`Response`]. Any other code is kept as [`FunctionCode::Custom`] and
/// servers answer it with [`ExceptionCode::IllegalFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 0x01
    ReadCoils,

    /// 0x02
    ReadDiscreteInputs,

    /// 0x03
    ReadHoldingRegisters,

    /// 0x04
    ReadInputRegisters,

    /// 0x05
    WriteSingleCoil,

    /// 0x06
    WriteSingleRegister,

    /// 0x0F
    WriteMultipleCoils,

    /// 0x10
    WriteMultipleRegisters,

    /// 0x16
    MaskWriteRegister,

    /// 0x17
    ReadWriteMultipleRegisters,

    /// Not decoded into a typed PDU.
    Custom(u8),
}

impl FunctionCode {
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x16 => Self::MaskWriteRegister,
            0x17 => Self::ReadWriteMultipleRegisters,
            code => Self::Custom(code),
        }
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::MaskWriteRegister => 0x16,
            Self::ReadWriteMultipleRegisters => 0x17,
            Self::Custom(code) => code,
        }
    }

    /// `value() | 0x80`, as sent in an exception response.
    #[must_use]
    pub const fn exception_value(self) -> u8 {
        self.value() | 0x80
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// 0-based address on the wire. Device manuals often count from 1.
pub type Address = u16;

/// A coil or discrete input.
///
/// Single coil writes put `0xFF00` on the wire for `true` and `0x0000` for
/// `false`. Multiple coils are packed LSB first.
pub type Coil = bool;

/// A register value, big-endian on the wire.
pub type Word = u16;

pub type Quantity = u16;

/// A decoded request PDU.
///
/// Write data is borrowed where possible, so that building a request from
/// a slice does not copy. Use [`Request::into_owned()`] to keep it.
///
/// Requests whose PDU would exceed
/// [`MAX_PDU_SIZE`](crate::codec::MAX_PDU_SIZE) (253 bytes) fail to encode
/// with [`std::io::ErrorKind::InvalidInput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// Start address and number of coils.
    ReadCoils(Address, Quantity),

    ReadDiscreteInputs(Address, Quantity),

    WriteSingleCoil(Address, Coil),

    /// Packed into bytes LSB first.
    WriteMultipleCoils(Address, Cow<'a, [Coil]>),

    ReadInputRegisters(Address, Quantity),

    ReadHoldingRegisters(Address, Quantity),

    WriteSingleRegister(Address, Word),

    WriteMultipleRegisters(Address, Cow<'a, [Word]>),

    /// Address, AND mask and OR mask. The server stores
    /// `(current & and_mask) | (or_mask & !and_mask)`.
    MaskWriteRegister(Address, Word, Word),

    /// Read address and count, then write address and data. The write is
    /// applied before the read.
    ReadWriteMultipleRegisters(Address, Quantity, Address, Cow<'a, [Word]>),
}

impl Request<'_> {
    /// Copies borrowed write data.
    #[must_use]
    pub fn into_owned(self) -> Request<'static> {
        use Request::*;

        match self {
            ReadCoils(addr, qty) => ReadCoils(addr, qty),
            ReadDiscreteInputs(addr, qty) => ReadDiscreteInputs(addr, qty),
            WriteSingleCoil(addr, coil) => WriteSingleCoil(addr, coil),
            WriteMultipleCoils(addr, coils) => {
                WriteMultipleCoils(addr, Cow::Owned(coils.into_owned()))
            }
            ReadInputRegisters(addr, qty) => ReadInputRegisters(addr, qty),
            ReadHoldingRegisters(addr, qty) => ReadHoldingRegisters(addr, qty),
            WriteSingleRegister(addr, word) => WriteSingleRegister(addr, word),
            WriteMultipleRegisters(addr, words) => {
                WriteMultipleRegisters(addr, Cow::Owned(words.into_owned()))
            }
            MaskWriteRegister(addr, and_mask, or_mask) => {
                MaskWriteRegister(addr, and_mask, or_mask)
            }
            ReadWriteMultipleRegisters(addr, qty, write_addr, words) => {
                ReadWriteMultipleRegisters(addr, qty, write_addr, Cow::Owned(words.into_owned()))
            }
        }
    }

    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;

        match self {
            ReadCoils(_, _) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_, _) => FunctionCode::ReadDiscreteInputs,

            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,

            ReadInputRegisters(_, _) => FunctionCode::ReadInputRegisters,
            ReadHoldingRegisters(_, _) => FunctionCode::ReadHoldingRegisters,

            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,

            MaskWriteRegister(_, _, _) => FunctionCode::MaskWriteRegister,

            ReadWriteMultipleRegisters(_, _, _, _) => FunctionCode::ReadWriteMultipleRegisters,
        }
    }
}

/// A decoded response PDU that is not an exception.
///
/// Decoding only sees the byte count, so coil responses always hold a
/// multiple of 8 values. The client contexts cut them down to the
/// requested quantity and reject responses that carry fewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),

    ReadDiscreteInputs(Vec<Coil>),

    /// Echo of the request.
    WriteSingleCoil(Address, Coil),

    /// Start address and number of coils written.
    WriteMultipleCoils(Address, Quantity),

    ReadInputRegisters(Vec<Word>),

    ReadHoldingRegisters(Vec<Word>),

    /// Echo of the request.
    WriteSingleRegister(Address, Word),

    /// Start address and number of registers written.
    WriteMultipleRegisters(Address, Quantity),

    /// Echo of the request.
    MaskWriteRegister(Address, Word, Word),

    /// The registers read after the write took place.
    ReadWriteMultipleRegisters(Vec<Word>),
}

impl Response {
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Response::*;

        match self {
            ReadCoils(_) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,

            WriteSingleCoil(_, _) => FunctionCode::WriteSingleCoil,
            WriteMultipleCoils(_, _) => FunctionCode::WriteMultipleCoils,

            ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,

            WriteSingleRegister(_, _) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(_, _) => FunctionCode::WriteMultipleRegisters,

            MaskWriteRegister(_, _, _) => FunctionCode::MaskWriteRegister,

            ReadWriteMultipleRegisters(_) => FunctionCode::ReadWriteMultipleRegisters,
        }
    }
}

/// The second byte of an exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    ServerDeviceFailure,
    /// 0x05
    Acknowledge,
    /// 0x06
    ServerDeviceBusy,
    /// 0x08
    MemoryParityError,
    /// 0x0A
    GatewayPathUnavailable,
    /// 0x0B
    GatewayTargetDevice,
    /// Any other code. [`Self::new()`] never yields a known code as `Custom`.
    Custom(u8),
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        use crate::frame::ExceptionCode::*;
        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            ServerDeviceFailure => 0x04,
            Acknowledge => 0x05,
            ServerDeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }
}

impl ExceptionCode {
    #[must_use]
    pub const fn new(value: u8) -> Self {
        use crate::frame::ExceptionCode::*;

        match value {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            other => Custom(other),
        }
    }

    pub(crate) fn description(&self) -> &str {
        use crate::frame::ExceptionCode::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Custom",
        }
    }
}

/// A response whose function code has the high bit set.
///
/// Servers reply with it when a [`Service`](crate::server::Service) fails
/// with an exception, clients surface it as
/// [`Error::Exception`](crate::Error::Exception).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

impl ExceptionResponse {
    #[must_use]
    pub const fn new(function: FunctionCode, exception: ExceptionCode) -> Self {
        Self {
            function,
            exception,
        }
    }
}

/// A request as handed to the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPdu<'a>(pub Request<'a>);

impl<'a> From<Request<'a>> for RequestPdu<'a> {
    fn from(from: Request<'a>) -> Self {
        RequestPdu(from)
    }
}

impl<'a> From<RequestPdu<'a>> for Request<'a> {
    fn from(from: RequestPdu<'a>) -> Self {
        from.0
    }
}

/// Either a regular or an exception response, as written by servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu(pub Result<Response, ExceptionResponse>);

impl ResponsePdu {
    /// The function code reported on the wire, i.e. with the high bit set
    /// for exception responses.
    #[must_use]
    pub const fn wire_function_code(&self) -> u8 {
        match &self.0 {
            Ok(response) => response.function_code().value(),
            Err(ExceptionResponse { function, .. }) => function.exception_value(),
        }
    }
}

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}
