// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental splitting of an RTU byte stream into frames.
//!
//! RTU carries no length field. The total frame length is inferred from
//! the function code and, for variable sized frames, from an embedded byte
//! count that only becomes readable once enough bytes have arrived.

use std::mem;

use bytes::BytesMut;

use crate::frame::rtu::RtuFrame;

/// Maximum size of an RTU ADU: unit id, PDU and checksum.
pub const MAX_ADU_LEN: usize = 256;

// unit id + checksum
const ADU_OVERHEAD: usize = 3;

/// Which side of the exchange the parsed frames originate from.
///
/// Requests and responses share function codes but not their layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
}

impl FrameKind {
    /// Total ADU length for the buffered prefix `adu`.
    ///
    /// `Ok(None)` means that more bytes are needed to decide.
    fn frame_len(self, adu: &[u8]) -> Result<Option<usize>, String> {
        if adu.len() < 2 {
            return Ok(None);
        }
        let fn_code = adu[1];
        let pdu_len = match self {
            Self::Request => request_pdu_len(fn_code, adu)?,
            Self::Response => response_pdu_len(fn_code, adu)?,
        };
        let Some(pdu_len) = pdu_len else {
            return Ok(None);
        };
        let adu_len = pdu_len + ADU_OVERHEAD;
        if adu_len > MAX_ADU_LEN {
            return Err(format!(
                "frame of {adu_len} bytes for function code 0x{fn_code:02X} exceeds the maximum ADU size"
            ));
        }
        Ok(Some(adu_len))
    }
}

fn byte_count_at(adu: &[u8], index: usize) -> Option<usize> {
    adu.get(index).map(|count| usize::from(*count))
}

fn request_pdu_len(fn_code: u8, adu: &[u8]) -> Result<Option<usize>, String> {
    let len = match fn_code {
        0x01..=0x06 => Some(5),
        0x0F | 0x10 => byte_count_at(adu, 6).map(|count| 6 + count),
        0x16 => Some(7),
        0x17 => byte_count_at(adu, 10).map(|count| 10 + count),
        _ => return Err(format!("unsupported request function code 0x{fn_code:02X}")),
    };
    Ok(len)
}

fn response_pdu_len(fn_code: u8, adu: &[u8]) -> Result<Option<usize>, String> {
    let len = match fn_code {
        0x01..=0x04 | 0x17 => byte_count_at(adu, 2).map(|count| 2 + count),
        0x05 | 0x06 | 0x0F | 0x10 => Some(5),
        0x16 => Some(7),
        // exception: function code, exception code
        code if code & 0x80 != 0 => Some(2),
        _ => return Err(format!("unsupported response function code 0x{fn_code:02X}")),
    };
    Ok(len)
}

/// The state of a [`FrameAccumulator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParserState {
    #[default]
    Idle,
    Accumulating {
        buffer: BytesMut,
        /// Total frame length once it could be inferred.
        expected_len: Option<usize>,
    },
    /// A complete frame. Terminal until reset.
    Accumulated(RtuFrame),
    /// The stream could not be split. Absorbs all further input until reset.
    ParseError { buffer: BytesMut, message: String },
}

/// Restartable RTU frame splitter.
///
/// Feeding a frame byte by byte yields the same result as feeding it in
/// a single chunk.
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    kind: FrameKind,
    state: ParserState,
}

impl FrameAccumulator {
    #[must_use]
    pub const fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            state: ParserState::Idle,
        }
    }

    /// Accumulator for frames sent by a client.
    #[must_use]
    pub const fn requests() -> Self {
        Self::new(FrameKind::Request)
    }

    /// Accumulator for frames sent by a server.
    #[must_use]
    pub const fn responses() -> Self {
        Self::new(FrameKind::Response)
    }

    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        self.kind
    }

    #[must_use]
    pub const fn state(&self) -> &ParserState {
        &self.state
    }

    /// Feed `chunk` into the parser.
    ///
    /// Returns the number of bytes absorbed. Bytes past the end of a
    /// complete frame are not absorbed and must be fed again after the
    /// frame has been taken.
    pub fn parse(&mut self, chunk: &[u8]) -> usize {
        let mut absorbed = 0;
        while absorbed < chunk.len() {
            match &mut self.state {
                ParserState::Accumulated(_) => break,
                ParserState::ParseError { buffer, .. } => {
                    buffer.extend_from_slice(&chunk[absorbed..]);
                    absorbed = chunk.len();
                }
                ParserState::Idle => {
                    self.state = ParserState::Accumulating {
                        buffer: BytesMut::with_capacity(MAX_ADU_LEN),
                        expected_len: None,
                    };
                }
                ParserState::Accumulating {
                    buffer,
                    expected_len,
                } => {
                    // Until the length is known only a single byte is taken
                    // at a time, so no byte of a following frame is absorbed.
                    let wanted = expected_len.map_or(1, |len| len - buffer.len());
                    let taken = wanted.min(chunk.len() - absorbed);
                    buffer.extend_from_slice(&chunk[absorbed..absorbed + taken]);
                    absorbed += taken;
                    self.evaluate();
                }
            }
        }
        absorbed
    }

    fn evaluate(&mut self) {
        let ParserState::Accumulating {
            buffer,
            expected_len,
        } = &mut self.state
        else {
            return;
        };
        if expected_len.is_none() {
            match self.kind.frame_len(buffer) {
                Ok(len) => *expected_len = len,
                Err(message) => {
                    log::debug!("Failed to split RTU frame: {message}");
                    let buffer = mem::take(buffer);
                    self.state = ParserState::ParseError { buffer, message };
                    return;
                }
            }
        }
        let Some(len) = *expected_len else {
            return;
        };
        if buffer.len() < len {
            return;
        }
        debug_assert_eq!(buffer.len(), len);
        let adu = mem::take(buffer).freeze();
        let unit_id = adu[0];
        let pdu = adu.slice(1..len - 2);
        let crc = u16::from_le_bytes([adu[len - 2], adu[len - 1]]);
        log::trace!("Accumulated RTU frame of {len} bytes from unit {unit_id}");
        self.state = ParserState::Accumulated(RtuFrame { unit_id, pdu, crc });
    }

    #[must_use]
    pub const fn is_accumulated(&self) -> bool {
        matches!(self.state, ParserState::Accumulated(_))
    }

    #[must_use]
    pub const fn is_parse_error(&self) -> bool {
        matches!(self.state, ParserState::ParseError { .. })
    }

    /// Take the complete frame, if any, and reset the parser.
    pub fn take_frame(&mut self) -> Option<RtuFrame> {
        if !self.is_accumulated() {
            return None;
        }
        match mem::take(&mut self.state) {
            ParserState::Accumulated(frame) => Some(frame),
            _ => None,
        }
    }

    /// Discard all buffered bytes and return to [`ParserState::Idle`].
    pub fn reset(&mut self) {
        self.state = ParserState::Idle;
    }
}
