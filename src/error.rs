// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::{io, time::Duration};

use thiserror::Error;

use crate::{frame::ExceptionResponse, unit::UnitId};

/// Failure of a client request.
#[derive(Debug, Error)]
pub enum Error {
    /// The server responded with a _Modbus_ exception.
    #[error("exception: {0}")]
    Exception(#[from] ExceptionResponse),

    /// The response could not be correlated with the request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Sending the request failed.
    #[error("transport: {0}")]
    Transport(#[source] io::Error),

    /// The response could not be decoded.
    #[error("decode: {0}")]
    Decode(#[source] io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("not connected")]
    NotConnected,
}

/// Violations of the request/response protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The function code of the response neither matches the request nor
    /// denotes an exception for it.
    #[error("function code mismatch: request = 0x{request:02X}, response = 0x{response:02X}")]
    FunctionCodeMismatch { request: u8, response: u8 },

    #[error("unit id mismatch: expected = {expected}, actual = {actual}")]
    UnitIdMismatch { expected: UnitId, actual: UnitId },

    #[error("CRC mismatch: expected = 0x{expected:04X}, actual = 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// The request was still pending when the response stream was found
    /// out of lockstep and has been abandoned.
    #[error("response stream desynchronized while awaiting function 0x{function:02X}")]
    Desynchronized { function: u8 },

    #[error("invalid protocol identifier: {0}")]
    InvalidProtocolId(u16),

    /// The response carries fewer coils or a different number of
    /// registers than requested.
    #[error("response to function 0x{function:02X} contains {actual} item(s) instead of {expected}")]
    QuantityMismatch {
        function: u8,
        expected: usize,
        actual: usize,
    },

    /// The address, value, quantity or masks of a write response differ
    /// from the request.
    #[error("response to function 0x{function:02X} does not echo the request")]
    EchoMismatch { function: u8 },
}

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        Self::new(io::ErrorKind::InvalidData, err)
    }
}

/// Result of a client request.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure raised by a server-side service handler.
#[cfg(feature = "server")]
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Reported to the client as an exception response.
    #[error(transparent)]
    Exception(#[from] ExceptionResponse),

    /// The unit is not served here. No response is sent.
    #[error("unknown unit: {0}")]
    UnknownUnit(UnitId),

    /// Closes the connection.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "server")]
impl From<io::Error> for ServiceError {
    fn from(err: io::Error) -> Self {
        Self::Internal(Box::new(err))
    }
}

#[cfg(feature = "server")]
impl From<ProcessImageError> for ServiceError {
    fn from(err: ProcessImageError) -> Self {
        Self::Internal(Box::new(err))
    }
}

/// Misuse of the process image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProcessImageError {
    /// A transaction was opened while another transaction on the same
    /// image is active on the current thread.
    #[error("nested transaction on the same process image")]
    NestedTransaction,
}
