// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CRC-16/MODBUS checksum.

const INITIAL: u16 = 0xFFFF;
const POLYNOMIAL: u16 = 0xA001;

/// Running CRC-16/MODBUS checksum.
///
/// The returned register value is transmitted little-endian, i.e. low
/// byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    crc: u16,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    #[must_use]
    pub const fn new() -> Self {
        Self { crc: INITIAL }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.crc ^= u16::from(*byte);
            for _ in 0..8 {
                if (self.crc & 0x0001) != 0 {
                    self.crc >>= 1;
                    self.crc ^= POLYNOMIAL;
                } else {
                    self.crc >>= 1;
                }
            }
        }
    }

    #[must_use]
    pub const fn finish(self) -> u16 {
        self.crc
    }
}

/// Calculate the checksum of `bytes` in one go.
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(bytes);
    crc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_checksums() {
        assert_eq!(crc16(&[0x12, 0x34, 0x56, 0x78, 0x09]), 0x2590);
        assert_eq!(crc16(&[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02]), 0x63B6);
        assert_eq!(
            crc16(&[0x01, 0x03, 0x04, 0x89, 0x02, 0x42, 0xC7]),
            0x9D00
        );
    }

    #[test]
    fn empty_input_yields_initial_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn incremental_update_matches_one_shot() {
        let data = [0x01, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02];
        let mut crc = Crc16::new();
        for chunk in data.chunks(3) {
            crc.update(chunk);
        }
        assert_eq!(crc.finish(), crc16(&data));
    }
}
