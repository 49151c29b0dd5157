// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus server skeletons
//!
//! A [`Service`] implements one method per supported function code. The
//! transport specific modules decode incoming frames, [`dispatch`] the
//! requests and write back the responses.

mod authz;
mod service;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use self::{
    authz::{Access, AuthorizationPolicy, AuthorizingService, RoleBasedPolicy},
    service::{dispatch, RequestContext, Service},
};

use crate::frame::{ExceptionCode, ExceptionResponse, FunctionCode};

/// Reply with _Illegal Function_ to requests with function codes that
/// are not supported at all.
///
/// Returns `None` for malformed PDUs of supported function codes.
pub(crate) fn unsupported_function(pdu: &[u8]) -> Option<ExceptionResponse> {
    let code = *pdu.first()?;
    if code & 0x80 != 0 {
        return None;
    }
    match FunctionCode::new(code) {
        function @ FunctionCode::Custom(_) => Some(ExceptionResponse::new(
            function,
            ExceptionCode::IllegalFunction,
        )),
        _ => None,
    }
}
