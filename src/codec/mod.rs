// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Byte-exact encoding and decoding of _Modbus_ PDUs.
//!
//! Decoding is split into a request and a response table. The caller picks
//! the table, the function code byte alone never decides the direction.

use std::io::{self, Cursor, Error, ErrorKind};

use byteorder::{BigEndian, ReadBytesExt as _};
use bytes::{BufMut as _, Bytes, BytesMut};

use crate::frame::{
    Coil, ExceptionCode, ExceptionResponse, FunctionCode, Request, RequestPdu, Response,
    ResponsePdu, Word,
};

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

/// Maximum request/response PDU size.
///
/// As defined by the Modbus application protocol for both RTU and TCP.
pub const MAX_PDU_SIZE: usize = 253;

#[allow(clippy::cast_possible_truncation)]
fn u16_len(len: usize) -> u16 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
fn u8_len(len: usize) -> u8 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u8::MAX.into());
    len as u8
}

/// Write the wire bytes of a request PDU, starting with the function code.
pub fn encode_request_pdu(buf: &mut BytesMut, request: &Request<'_>) {
    use crate::frame::Request::*;
    buf.put_u8(request.function_code().value());
    match request {
        ReadCoils(address, quantity)
        | ReadDiscreteInputs(address, quantity)
        | ReadInputRegisters(address, quantity)
        | ReadHoldingRegisters(address, quantity) => {
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
        WriteSingleCoil(address, state) => {
            buf.put_u16(*address);
            buf.put_u16(bool_to_coil(*state));
        }
        WriteMultipleCoils(address, coils) => {
            buf.put_u16(*address);
            buf.put_u16(u16_len(coils.len()));
            buf.put_u8(u8_len(packed_coils_size(coils)));
            encode_packed_coils(buf, coils);
        }
        WriteSingleRegister(address, word) => {
            buf.put_u16(*address);
            buf.put_u16(*word);
        }
        WriteMultipleRegisters(address, words) => {
            buf.put_u16(*address);
            let len = words.len();
            buf.put_u16(u16_len(len));
            buf.put_u8(u8_len(len * 2));
            for w in words.as_ref() {
                buf.put_u16(*w);
            }
        }
        MaskWriteRegister(address, and_mask, or_mask) => {
            buf.put_u16(*address);
            buf.put_u16(*and_mask);
            buf.put_u16(*or_mask);
        }
        ReadWriteMultipleRegisters(read_address, quantity, write_address, words) => {
            buf.put_u16(*read_address);
            buf.put_u16(*quantity);
            buf.put_u16(*write_address);
            let len = words.len();
            buf.put_u16(u16_len(len));
            buf.put_u8(u8_len(len * 2));
            for w in words.as_ref() {
                buf.put_u16(*w);
            }
        }
    }
}

/// Write the wire bytes of a normal response PDU.
pub fn encode_response_pdu(buf: &mut BytesMut, response: &Response) {
    use crate::frame::Response::*;
    buf.put_u8(response.function_code().value());
    match response {
        ReadCoils(coils) | ReadDiscreteInputs(coils) => {
            buf.put_u8(u8_len(packed_coils_size(coils)));
            encode_packed_coils(buf, coils);
        }
        ReadInputRegisters(registers)
        | ReadHoldingRegisters(registers)
        | ReadWriteMultipleRegisters(registers) => {
            buf.put_u8(u8_len(registers.len() * 2));
            for r in registers {
                buf.put_u16(*r);
            }
        }
        WriteSingleCoil(address, state) => {
            buf.put_u16(*address);
            buf.put_u16(bool_to_coil(*state));
        }
        WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
        WriteSingleRegister(address, word) => {
            buf.put_u16(*address);
            buf.put_u16(*word);
        }
        MaskWriteRegister(address, and_mask, or_mask) => {
            buf.put_u16(*address);
            buf.put_u16(*and_mask);
            buf.put_u16(*or_mask);
        }
    }
}

/// Write an exception response: `function | 0x80` followed by the exception code.
pub fn encode_exception_response_pdu(buf: &mut BytesMut, rsp: ExceptionResponse) {
    debug_assert!(rsp.function.value() < 0x80);
    buf.put_u8(rsp.function.exception_value());
    buf.put_u8(rsp.exception.into());
}

pub fn encode_response_result_pdu(buf: &mut BytesMut, pdu: &ResponsePdu) {
    match &pdu.0 {
        Ok(rsp) => encode_response_pdu(buf, rsp),
        Err(rsp) => encode_exception_response_pdu(buf, *rsp),
    }
}

fn read_u16_be(reader: &mut impl io::Read) -> io::Result<u16> {
    reader.read_u16::<BigEndian>()
}

fn read_words(rdr: &mut Cursor<&[u8]>, quantity: usize) -> io::Result<Vec<Word>> {
    let mut data = Vec::with_capacity(quantity);
    for _ in 0..quantity {
        data.push(read_u16_be(rdr)?);
    }
    Ok(data)
}

fn read_packed_bytes<'b>(rdr: &mut Cursor<&'b [u8]>, byte_count: usize) -> io::Result<&'b [u8]> {
    let bytes: &'b [u8] = rdr.get_ref();
    let start = usize::try_from(rdr.position())
        .map_err(|_| Error::new(ErrorKind::InvalidData, "invalid cursor position"))?;
    let end = start + byte_count;
    if bytes.len() < end {
        return Err(Error::new(ErrorKind::UnexpectedEof, "too short"));
    }
    rdr.set_position(end as u64);
    Ok(&bytes[start..end])
}

fn has_remaining(rdr: &Cursor<&[u8]>) -> bool {
    (rdr.position() as usize) < rdr.get_ref().len()
}

/// Decode the body of a request PDU whose function code has already been
/// consumed from `rdr`.
///
/// Consumes exactly the bytes defined for `function`.
///
/// # Errors
///
/// Fails if the cursor is exhausted prematurely, if a byte count does not
/// match the declared quantity or if `function` is not supported.
pub fn decode_request(function: FunctionCode, rdr: &mut Cursor<&[u8]>) -> io::Result<Request<'static>> {
    use crate::frame::Request::*;
    let req = match function {
        FunctionCode::ReadCoils => ReadCoils(read_u16_be(rdr)?, read_u16_be(rdr)?),
        FunctionCode::ReadDiscreteInputs => ReadDiscreteInputs(read_u16_be(rdr)?, read_u16_be(rdr)?),
        FunctionCode::WriteSingleCoil => {
            WriteSingleCoil(read_u16_be(rdr)?, coil_to_bool(read_u16_be(rdr)?)?)
        }
        FunctionCode::WriteMultipleCoils => {
            let address = read_u16_be(rdr)?;
            let quantity = read_u16_be(rdr)?;
            let byte_count = usize::from(rdr.read_u8()?);
            if byte_count != (usize::from(quantity) + 7) / 8 {
                return Err(Error::new(ErrorKind::InvalidData, "invalid byte count"));
            }
            let packed_coils = read_packed_bytes(rdr, byte_count)?;
            WriteMultipleCoils(address, decode_packed_coils(packed_coils, quantity).into())
        }
        FunctionCode::ReadInputRegisters => ReadInputRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?),
        FunctionCode::ReadHoldingRegisters => {
            ReadHoldingRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::WriteSingleRegister => {
            WriteSingleRegister(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::WriteMultipleRegisters => {
            let address = read_u16_be(rdr)?;
            let quantity = read_u16_be(rdr)?;
            let byte_count = rdr.read_u8()?;
            if usize::from(byte_count) != usize::from(quantity) * 2 {
                return Err(Error::new(ErrorKind::InvalidData, "invalid quantity"));
            }
            WriteMultipleRegisters(address, read_words(rdr, quantity.into())?.into())
        }
        FunctionCode::MaskWriteRegister => {
            let address = read_u16_be(rdr)?;
            let and_mask = read_u16_be(rdr)?;
            let or_mask = read_u16_be(rdr)?;
            MaskWriteRegister(address, and_mask, or_mask)
        }
        FunctionCode::ReadWriteMultipleRegisters => {
            let read_address = read_u16_be(rdr)?;
            let read_quantity = read_u16_be(rdr)?;
            let write_address = read_u16_be(rdr)?;
            let write_quantity = read_u16_be(rdr)?;
            let write_count = rdr.read_u8()?;
            if usize::from(write_count) != usize::from(write_quantity) * 2 {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "invalid write quantity",
                ));
            }
            let data = read_words(rdr, write_quantity.into())?;
            ReadWriteMultipleRegisters(read_address, read_quantity, write_address, data.into())
        }
        FunctionCode::Custom(code) => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("unsupported function code: 0x{code:02X}"),
            ));
        }
    };
    Ok(req)
}

/// Decode the body of a normal response PDU whose function code has
/// already been consumed from `rdr`.
///
/// # Errors
///
/// Fails if the cursor is exhausted prematurely, if a byte count is
/// invalid or if `function` is not supported.
pub fn decode_response(function: FunctionCode, rdr: &mut Cursor<&[u8]>) -> io::Result<Response> {
    use crate::frame::Response::*;
    let rsp = match function {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
            let byte_count = rdr.read_u8()?;
            let packed_coils = read_packed_bytes(rdr, byte_count.into())?;
            // Here we have no information about the exact requested quantity so we just
            // unpack the whole byte.
            let quantity = u16::from(byte_count) * 8;
            let coils = decode_packed_coils(packed_coils, quantity);
            if function == FunctionCode::ReadCoils {
                ReadCoils(coils)
            } else {
                ReadDiscreteInputs(coils)
            }
        }
        FunctionCode::WriteSingleCoil => {
            WriteSingleCoil(read_u16_be(rdr)?, coil_to_bool(read_u16_be(rdr)?)?)
        }
        FunctionCode::WriteMultipleCoils => WriteMultipleCoils(read_u16_be(rdr)?, read_u16_be(rdr)?),
        FunctionCode::ReadInputRegisters
        | FunctionCode::ReadHoldingRegisters
        | FunctionCode::ReadWriteMultipleRegisters => {
            let byte_count = rdr.read_u8()?;
            if byte_count % 2 != 0 {
                return Err(Error::new(ErrorKind::InvalidData, "invalid quantity"));
            }
            let data = read_words(rdr, usize::from(byte_count / 2))?;
            match function {
                FunctionCode::ReadInputRegisters => ReadInputRegisters(data),
                FunctionCode::ReadHoldingRegisters => ReadHoldingRegisters(data),
                _ => ReadWriteMultipleRegisters(data),
            }
        }
        FunctionCode::WriteSingleRegister => {
            WriteSingleRegister(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::WriteMultipleRegisters => {
            WriteMultipleRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        FunctionCode::MaskWriteRegister => {
            let address = read_u16_be(rdr)?;
            let and_mask = read_u16_be(rdr)?;
            let or_mask = read_u16_be(rdr)?;
            MaskWriteRegister(address, and_mask, or_mask)
        }
        FunctionCode::Custom(code) => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("unsupported function code: 0x{code:02X}"),
            ));
        }
    };
    Ok(rsp)
}

/// Decode a complete request PDU.
///
/// # Errors
///
/// Fails on oversized, truncated, malformed or unsupported PDUs and if
/// bytes are left over after decoding.
pub fn decode_request_pdu(bytes: &[u8]) -> io::Result<Request<'static>> {
    if bytes.len() > MAX_PDU_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "request PDU size exceeded",
        ));
    }
    let rdr = &mut Cursor::new(bytes);
    let fn_code = rdr.read_u8()?;
    if fn_code >= 0x80 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid function code: 0x{fn_code:02X}"),
        ));
    }
    let req = decode_request(FunctionCode::new(fn_code), rdr)?;
    // Verify that all data has been consumed and decoded.
    if has_remaining(rdr) {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "undecoded request data",
        ));
    }
    Ok(req)
}

/// Decode a complete response PDU, either a normal or an exception response.
///
/// Exception responses are recognized by the high bit of the function code.
///
/// # Errors
///
/// Fails on oversized, truncated, malformed or unsupported PDUs and if
/// bytes are left over after decoding.
pub fn decode_response_pdu(bytes: &[u8]) -> io::Result<ResponsePdu> {
    if bytes.len() > MAX_PDU_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "response PDU size exceeded",
        ));
    }
    let rdr = &mut Cursor::new(bytes);
    let fn_code = rdr.read_u8()?;
    let pdu = if fn_code < 0x80 {
        decode_response(FunctionCode::new(fn_code), rdr)?.into()
    } else {
        let function = FunctionCode::new(fn_code & 0x7F);
        let exception = ExceptionCode::new(rdr.read_u8()?);
        ExceptionResponse {
            function,
            exception,
        }
        .into()
    };
    if has_remaining(rdr) {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "undecoded response data",
        ));
    }
    Ok(pdu)
}

impl TryFrom<Bytes> for Request<'static> {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        decode_request_pdu(&bytes)
    }
}

impl TryFrom<Bytes> for RequestPdu<'static> {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let pdu = Request::try_from(bytes)?.into();
        Ok(pdu)
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        decode_response_pdu(&bytes)
    }
}

pub(crate) fn request_pdu_to_bytes(request: &Request<'_>) -> io::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(request_pdu_size(request)?);
    encode_request_pdu(&mut buf, request);
    Ok(buf.freeze())
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> io::Result<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid coil value: 0x{coil:04X}"),
        )),
    }
}

pub(crate) fn packed_coils_size(coils: &[Coil]) -> usize {
    (coils.len() + 7) / 8
}

/// Pack coils LSB-first, 8 per byte, zero-padding the final byte.
pub(crate) fn encode_packed_coils(buf: &mut BytesMut, coils: &[Coil]) -> usize {
    let packed_coils_size = packed_coils_size(coils);
    let offset = buf.len();
    buf.resize(offset + packed_coils_size, 0);
    let buf = &mut buf[offset..];
    for (i, b) in coils.iter().enumerate() {
        let v = u8::from(*b); // 0 or 1
        buf[i / 8] |= v << (i % 8);
    }
    packed_coils_size
}

/// `bytes` must contain at least `(count + 7) / 8` bytes.
fn decode_packed_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut res = Vec::with_capacity(count.into());
    for i in 0usize..count.into() {
        res.push((bytes[i / 8] >> (i % 8)) & 0b1 > 0);
    }
    res
}

pub(crate) fn request_pdu_size(req: &Request<'_>) -> io::Result<usize> {
    use crate::frame::Request::*;
    let size = match req {
        ReadCoils(_, _)
        | ReadDiscreteInputs(_, _)
        | ReadInputRegisters(_, _)
        | ReadHoldingRegisters(_, _)
        | WriteSingleRegister(_, _)
        | WriteSingleCoil(_, _) => 5,
        WriteMultipleCoils(_, coils) => 6 + packed_coils_size(coils),
        WriteMultipleRegisters(_, data) => 6 + data.len() * 2,
        MaskWriteRegister(_, _, _) => 7,
        ReadWriteMultipleRegisters(_, _, _, data) => 10 + data.len() * 2,
    };
    if size > MAX_PDU_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "request PDU size exceeded",
        ));
    }
    Ok(size)
}

pub(crate) fn response_pdu_size(pdu: &ResponsePdu) -> io::Result<usize> {
    use crate::frame::Response::*;
    let size = match &pdu.0 {
        Ok(ReadCoils(coils) | ReadDiscreteInputs(coils)) => 2 + packed_coils_size(coils),
        Ok(
            WriteSingleCoil(_, _)
            | WriteMultipleCoils(_, _)
            | WriteMultipleRegisters(_, _)
            | WriteSingleRegister(_, _),
        ) => 5,
        Ok(
            ReadInputRegisters(data)
            | ReadHoldingRegisters(data)
            | ReadWriteMultipleRegisters(data),
        ) => 2 + data.len() * 2,
        Ok(MaskWriteRegister(_, _, _)) => 7,
        Err(_) => 2,
    };
    if size > MAX_PDU_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "response PDU size exceeded",
        ));
    }
    Ok(size)
}
