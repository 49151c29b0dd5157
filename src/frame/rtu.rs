// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;

use super::*;

use crate::{rtu::crc::Crc16, unit::UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub unit_id: UnitId,
}

/// A complete _Modbus_ RTU frame as split off the byte stream.
///
/// The checksum is transmitted little-endian and is *not* verified on
/// construction. Use [`RtuFrame::verify_crc`] before trusting the PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    pub unit_id: UnitId,
    pub pdu: Bytes,
    pub crc: u16,
}

impl RtuFrame {
    /// Build a frame with a freshly calculated checksum.
    #[must_use]
    pub fn new(unit_id: UnitId, pdu: Bytes) -> Self {
        let crc = Self::calculate_crc(unit_id, &pdu);
        Self { unit_id, pdu, crc }
    }

    #[must_use]
    pub fn calculate_crc(unit_id: UnitId, pdu: &[u8]) -> u16 {
        let mut crc = Crc16::new();
        crc.update(&[unit_id]);
        crc.update(pdu);
        crc.finish()
    }

    /// Check the transmitted checksum against the unit id and PDU.
    ///
    /// # Errors
    ///
    /// Returns the calculated checksum if it differs from the received one.
    pub fn verify_crc(&self) -> Result<(), u16> {
        let expected = Self::calculate_crc(self.unit_id, &self.pdu);
        if expected == self.crc {
            Ok(())
        } else {
            Err(expected)
        }
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_frame_has_valid_crc() {
        let frame = RtuFrame::new(0x01, Bytes::from_static(&[0x03, 0x08, 0x2B, 0x00, 0x02]));
        assert_eq!(frame.crc, 0x63B6);
        assert!(frame.verify_crc().is_ok());
    }

    #[test]
    fn corrupted_byte_fails_crc() {
        let frame = RtuFrame::new(0x01, Bytes::from_static(&[0x03, 0x08, 0x2B, 0x00, 0x02]));
        for i in 0..frame.pdu.len() {
            let mut pdu = frame.pdu.to_vec();
            pdu[i] ^= 0x01;
            let corrupted = RtuFrame {
                pdu: pdu.into(),
                ..frame.clone()
            };
            assert!(corrupted.verify_crc().is_err());
        }
        let corrupted = RtuFrame {
            unit_id: 0x02,
            ..frame.clone()
        };
        assert!(corrupted.verify_crc().is_err());
        let corrupted = RtuFrame {
            crc: frame.crc ^ 0x0100,
            ..frame
        };
        assert!(corrupted.verify_crc().is_err());
    }
}
