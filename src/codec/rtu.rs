// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing on top of the [`FrameAccumulator`].

use std::{
    io::{self, Error},
    sync::Arc,
};

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    frame::{
        rtu::{ResponseAdu, RtuFrame},
        Request, ResponsePdu,
    },
    rtu::{crc16, FrameAccumulator, FrameKind, ParserState},
    unit::UnitId,
};

use super::{encode_request_pdu, encode_response_result_pdu, request_pdu_size, response_pdu_size};

/// Shared access to the frame parser of an [`RtuCodec`].
///
/// The parser may be reset from outside the read loop, e.g. after a
/// response timed out in the middle of a frame.
#[derive(Debug, Clone)]
pub struct ParserHandle(Arc<Mutex<FrameAccumulator>>);

impl ParserHandle {
    pub fn reset(&self) {
        self.0.lock().reset();
    }

    #[must_use]
    pub fn state(&self) -> ParserState {
        self.0.lock().state().clone()
    }
}

/// Splits a byte stream into [`RtuFrame`]s and writes RTU framed ADUs.
///
/// The checksum of decoded frames is not verified, the receiver decides
/// how to handle corrupted frames.
///
/// Clones share the same parser.
#[derive(Debug, Clone)]
pub struct RtuCodec {
    parser: ParserHandle,
    recover_from_parse_errors: bool,
}

impl RtuCodec {
    /// Codec for the client side that reads responses.
    ///
    /// A stream that could not be split stays in the error state until
    /// the parser is reset through its [`ParserHandle`].
    #[must_use]
    pub fn client() -> Self {
        Self::new(FrameKind::Response, false)
    }

    /// Codec for the server side that reads requests.
    ///
    /// Unparsable input is discarded and the parser restarts with the
    /// next chunk.
    #[must_use]
    pub fn server() -> Self {
        Self::new(FrameKind::Request, true)
    }

    fn new(kind: FrameKind, recover_from_parse_errors: bool) -> Self {
        Self {
            parser: ParserHandle(Arc::new(Mutex::new(FrameAccumulator::new(kind)))),
            recover_from_parse_errors,
        }
    }

    #[must_use]
    pub fn parser(&self) -> ParserHandle {
        self.parser.clone()
    }
}

impl Decoder for RtuCodec {
    type Item = RtuFrame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<RtuFrame>> {
        let mut parser = self.parser.0.lock();
        let absorbed = parser.parse(buf);
        buf.advance(absorbed);
        if let Some(frame) = parser.take_frame() {
            return Ok(Some(frame));
        }
        if let ParserState::ParseError { buffer, message } = parser.state() {
            if self.recover_from_parse_errors {
                log::warn!(
                    "Discarding {} unparsable byte(s): {message}",
                    buffer.len()
                );
                parser.reset();
            }
        }
        Ok(None)
    }
}

fn put_crc(buf: &mut BytesMut, adu_start: usize) {
    let crc = crc16(&buf[adu_start..]);
    buf.put_u16_le(crc);
}

/// Encode a complete request frame, including the checksum.
///
/// # Errors
///
/// Fails if the request exceeds the maximum PDU size.
pub fn encode_request_frame(unit_id: UnitId, request: &Request<'_>) -> io::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(request_pdu_size(request)? + 3);
    buf.put_u8(unit_id);
    encode_request_pdu(&mut buf, request);
    put_crc(&mut buf, 0);
    Ok(buf.freeze())
}

impl Encoder<ResponseAdu> for RtuCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> io::Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        buf.reserve(response_pdu_size(&pdu)? + 3);
        let adu_start = buf.len();
        buf.put_u8(hdr.unit_id);
        encode_response_result_pdu(buf, &pdu);
        put_crc(buf, adu_start);
        Ok(())
    }
}

/// Pre-encoded frames are written as is.
impl Encoder<Bytes> for RtuCodec {
    type Error = Error;

    fn encode(&mut self, frame: Bytes, buf: &mut BytesMut) -> io::Result<()> {
        buf.extend_from_slice(&frame);
        Ok(())
    }
}

impl TryFrom<RtuFrame> for ResponsePdu {
    type Error = Error;

    fn try_from(frame: RtuFrame) -> Result<Self, Self::Error> {
        Self::try_from(frame.pdu)
    }
}
