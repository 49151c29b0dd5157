// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing primitives

pub mod accumulator;
pub mod crc;

pub use self::{
    accumulator::{FrameAccumulator, FrameKind, ParserState},
    crc::{crc16, Crc16},
};
