// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU server skeleton

use std::io;

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    codec::{decode_request_pdu, rtu::RtuCodec},
    frame::rtu::{Header, ResponseAdu, RtuFrame},
    unit::Unit,
};

use super::{dispatch, unsupported_function, RequestContext, Service};

/// Answer a single request frame.
///
/// Frames with an invalid checksum are dropped. Broadcast requests are
/// executed but never answered.
///
/// # Errors
///
/// Fails on malformed requests and on internal service failures.
pub async fn handle_frame<S>(
    service: &S,
    ctx: &RequestContext,
    frame: RtuFrame,
) -> io::Result<Option<ResponseAdu>>
where
    S: Service + ?Sized,
{
    let unit = Unit(frame.unit_id);
    if let Err(expected) = frame.verify_crc() {
        log::warn!(
            "Dropping request for unit {unit} with invalid CRC: expected = 0x{expected:0>4X}, actual = 0x{:0>4X}",
            frame.crc
        );
        return Ok(None);
    }
    let hdr = Header {
        unit_id: frame.unit_id,
    };
    let request = match decode_request_pdu(&frame.pdu) {
        Ok(request) => request,
        Err(err) => {
            if let Some(exception) = unsupported_function(&frame.pdu) {
                return Ok((!unit.is_broadcast()).then(|| ResponseAdu {
                    hdr,
                    pdu: exception.into(),
                }));
            }
            log::warn!("Invalid request for unit {unit}: {err}");
            return Err(err);
        }
    };
    log::debug!("Received {request:?} for unit {unit}");
    let response = dispatch(service, ctx, unit, request).await?;
    if unit.is_broadcast() {
        return Ok(None);
    }
    Ok(response.map(|pdu| ResponseAdu { hdr, pdu }))
}

/// The request-response loop on a serial line or any other byte stream.
///
/// Runs until the stream is exhausted.
///
/// # Errors
///
/// Fails on I/O errors, malformed requests, and internal service failures.
pub async fn serve_connection<T, S>(stream: T, service: &S, ctx: RequestContext) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: Service + ?Sized,
{
    let mut framed = Framed::new(stream, RtuCodec::server());
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        if let Some(response) = handle_frame(service, &ctx, frame).await? {
            framed.send(response).await?;
        }
    }
    Ok(())
}
