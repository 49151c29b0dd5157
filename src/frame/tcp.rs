// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;

use super::*;

use crate::unit::UnitId;

pub type TransactionId = u16;

/// The protocol identifier of _Modbus_ in the MBAP header.
pub const PROTOCOL_ID: u16 = 0x0000;

/// Size of the MBAP header in bytes, including the unit identifier.
pub const HEADER_LEN: usize = 7;

/// The addressing part of the MBAP header that is carried through a
/// request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub transaction_id: TransactionId,
    pub unit_id: UnitId,
}

/// The full MBAP header as received on the wire.
///
/// `length` counts the bytes following the length field, i.e. the unit
/// identifier plus the PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: TransactionId,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: UnitId,
}

impl MbapHeader {
    #[must_use]
    pub const fn header(&self) -> Header {
        Header {
            transaction_id: self.transaction_id,
            unit_id: self.unit_id,
        }
    }

    /// Number of PDU bytes that follow the header.
    #[must_use]
    pub const fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }
}

/// A complete but undecoded _Modbus_ TCP frame.
///
/// The PDU is kept as raw bytes, because the receiver decides which
/// decode table (request or response) applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFrame {
    pub header: MbapHeader,
    pub pdu: Bytes,
}

impl TcpFrame {
    /// The raw function code byte of the PDU, if any.
    #[must_use]
    pub fn function_code(&self) -> Option<u8> {
        self.pdu.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAdu {
    pub hdr: Header,
    pub pdu: ResponsePdu,
}
