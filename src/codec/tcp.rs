// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing of _Modbus_ TCP.

use std::io::{self, Cursor, Error, ErrorKind};

use byteorder::{BigEndian, ReadBytesExt as _};
use bytes::{BufMut as _, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::ProtocolError,
    frame::{
        tcp::{Header, MbapHeader, ResponseAdu, TcpFrame, TransactionId, HEADER_LEN, PROTOCOL_ID},
        Request, ResponsePdu,
    },
};

use super::{
    encode_request_pdu, encode_response_result_pdu, request_pdu_size, response_pdu_size,
    MAX_PDU_SIZE,
};

/// Splits a byte stream into [`TcpFrame`]s and writes MBAP framed ADUs.
///
/// The codec is stateless apart from the read buffer. It is used by both
/// clients and servers, the receiver decides how to decode the PDU.
#[derive(Debug, Default, Clone, Copy)]
pub struct MbapCodec;

impl MbapCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn decode_mbap_header(buf: &[u8]) -> io::Result<MbapHeader> {
    let mut rdr = Cursor::new(buf);
    let transaction_id = rdr.read_u16::<BigEndian>()?;
    let protocol_id = rdr.read_u16::<BigEndian>()?;
    let length = rdr.read_u16::<BigEndian>()?;
    let unit_id = rdr.read_u8()?;
    Ok(MbapHeader {
        transaction_id,
        protocol_id,
        length,
        unit_id,
    })
}

impl Decoder for MbapCodec {
    type Item = TcpFrame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<TcpFrame>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = decode_mbap_header(&buf[..HEADER_LEN])?;
        if header.protocol_id != PROTOCOL_ID {
            return Err(ProtocolError::InvalidProtocolId(header.protocol_id).into());
        }
        if header.length < 2 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid MBAP length: {}", header.length),
            ));
        }
        let pdu_len = header.pdu_len();
        if pdu_len > MAX_PDU_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("PDU of {pdu_len} bytes exceeds the maximum size"),
            ));
        }
        if buf.len() < HEADER_LEN + pdu_len {
            buf.reserve(HEADER_LEN + pdu_len - buf.len());
            return Ok(None);
        }
        let _ = buf.split_to(HEADER_LEN);
        let pdu = buf.split_to(pdu_len).freeze();
        Ok(Some(TcpFrame { header, pdu }))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn put_mbap_header(buf: &mut BytesMut, transaction_id: TransactionId, unit_id: u8, pdu_len: usize) {
    debug_assert!(pdu_len <= MAX_PDU_SIZE);
    buf.put_u16(transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16(pdu_len as u16 + 1);
    buf.put_u8(unit_id);
}

/// Encode a complete request frame.
///
/// # Errors
///
/// Fails if the request exceeds the maximum PDU size.
pub fn encode_request_frame(hdr: Header, request: &Request<'_>) -> io::Result<Bytes> {
    let pdu_len = request_pdu_size(request)?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + pdu_len);
    put_mbap_header(&mut buf, hdr.transaction_id, hdr.unit_id, pdu_len);
    encode_request_pdu(&mut buf, request);
    debug_assert_eq!(buf.len(), HEADER_LEN + pdu_len);
    Ok(buf.freeze())
}

impl Encoder<ResponseAdu> for MbapCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> io::Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_len = response_pdu_size(&pdu)?;
        buf.reserve(HEADER_LEN + pdu_len);
        put_mbap_header(buf, hdr.transaction_id, hdr.unit_id, pdu_len);
        encode_response_result_pdu(buf, &pdu);
        Ok(())
    }
}

/// Pre-encoded frames are written as is.
impl Encoder<Bytes> for MbapCodec {
    type Error = Error;

    fn encode(&mut self, frame: Bytes, buf: &mut BytesMut) -> io::Result<()> {
        buf.extend_from_slice(&frame);
        Ok(())
    }
}

impl TryFrom<TcpFrame> for ResponseAdu {
    type Error = Error;

    fn try_from(frame: TcpFrame) -> Result<Self, Self::Error> {
        let TcpFrame { header, pdu } = frame;
        let pdu = ResponsePdu::try_from(pdu)?;
        Ok(Self {
            hdr: header.header(),
            pdu,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::frame::{ExceptionCode, ExceptionResponse, FunctionCode, Response};

    use super::*;

    #[test]
    fn decode_header_fragment() {
        let mut codec = MbapCodec::default();
        let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00, 0x00][..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn decode_partly_received_message() {
        let mut codec = MbapCodec::default();
        let mut buf = BytesMut::from(
            &[
                0x00, // transaction id HI
                0x11, // transaction id LO
                0x00, // protocol id HI
                0x00, // protocol id LO
                0x00, // length HI
                0x03, // length LO
                0x66, // unit id
                0x02, // function code
            ][..],
        );
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn decode_complete_frame_and_keep_remainder() {
        let mut codec = MbapCodec::default();
        let mut buf = BytesMut::from(
            &[
                0x12, 0x34, 0x00, 0x00, 0x00, 0x03, 0x66, 0x82, 0x03, // frame
                0x00, // next frame
            ][..],
        );
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(buf.len(), 1);
        assert_eq!(frame.header.transaction_id, 0x1234);
        assert_eq!(frame.header.unit_id, 0x66);
        assert_eq!(frame.function_code(), Some(0x82));
        let adu = ResponseAdu::try_from(frame).unwrap();
        assert_eq!(
            adu.pdu,
            ResponsePdu(Err(ExceptionResponse::new(
                FunctionCode::ReadDiscreteInputs,
                ExceptionCode::IllegalDataValue,
            )))
        );
    }

    #[test]
    fn decode_with_invalid_protocol_id() {
        let mut codec = MbapCodec::default();
        let mut buf = BytesMut::from(
            &[0x00, 0x00, 0x33, 0x12, 0x00, 0x03, 0x66, 0x82, 0x03][..],
        );
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn decode_with_oversized_length() {
        let mut codec = MbapCodec::default();
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x01][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encode_read_request() {
        let hdr = Header {
            transaction_id: 0x0001,
            unit_id: 0xFF,
        };
        let frame = encode_request_frame(hdr, &Request::ReadInputRegisters(0x23, 5)).unwrap();
        assert_eq!(
            &frame[..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x04, 0x00, 0x23, 0x00, 0x05]
        );
        let frame = MbapCodec::default()
            .decode(&mut BytesMut::from(&frame[..]))
            .unwrap()
            .unwrap();
        assert_eq!(frame.header.transaction_id, 0x0001);
        assert_eq!(&frame.pdu[..], &[0x04, 0x00, 0x23, 0x00, 0x05]);
    }

    #[test]
    fn encode_response_length_follows_pdu() {
        let mut codec = MbapCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(
                ResponseAdu {
                    hdr: Header {
                        transaction_id: 0xBEEF,
                        unit_id: 0x01,
                    },
                    pdu: Response::ReadHoldingRegisters(vec![0x0102, 0x0304]).into(),
                },
                &mut buf,
            )
            .unwrap();
        assert_eq!(
            &buf[..],
            &[0xBE, 0xEF, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x01, 0x02, 0x03, 0x04]
        );
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.length, 7);
        assert_eq!(frame.pdu.len(), 6);
    }
}
