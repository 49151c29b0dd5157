// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

/// Raw unit identifier as carried in RTU frames and MBAP headers.
pub type UnitId = u8;

/// A single byte for addressing Modbus units (RTU slaves or
/// gateway-routed TCP devices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Unit(pub UnitId);

impl Unit {
    /// The special address for sending a broadcast message to all
    /// connected Modbus units at once. Broadcast messages
    /// are one-way, i.e. a request without a response.
    #[must_use]
    pub const fn broadcast() -> Self {
        Unit(0)
    }

    /// The minimum address of a single Modbus device.
    #[must_use]
    pub const fn min_device() -> Self {
        Unit(1)
    }

    /// The maximum address of a single Modbus device.
    #[must_use]
    pub const fn max_device() -> Self {
        Unit(247)
    }

    /// The reserved address for sending a message to a directly
    /// connected Modbus TCP device, i.e. if not forwarded through
    /// a TCP/RTU gateway according to the unit identifier.
    ///
    /// [MODBUS Messaging on TCP/IP Implementation Guide](http://www.modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf), page 23
    /// "On TCP/IP, the MODBUS server is addressed using its IP address; therefore,
    /// the MODBUS Unit Identifier is useless. The value 0xFF has to be used."
    #[must_use]
    pub const fn tcp_device() -> Self {
        Unit(255)
    }

    #[must_use]
    pub fn is_broadcast(self) -> bool {
        self == Self::broadcast()
    }

    #[must_use]
    pub fn is_single_device(self) -> bool {
        self >= Self::min_device() && self <= Self::max_device()
    }

    #[must_use]
    pub fn is_reserved(self) -> bool {
        self > Self::max_device()
    }
}

impl From<UnitId> for Unit {
    fn from(from: UnitId) -> Self {
        Unit(from)
    }
}

impl From<Unit> for UnitId {
    fn from(from: Unit) -> Self {
        from.0
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0>2X}", self.0)
    }
}
