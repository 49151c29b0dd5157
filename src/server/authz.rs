// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authorization of requests by the identity of the peer.

use std::{borrow::Cow, collections::HashMap};

use async_trait::async_trait;

use crate::{
    error::ServiceError,
    frame::{Address, Coil, ExceptionCode, ExceptionResponse, Quantity, Request, Word},
    unit::Unit,
};

use super::{RequestContext, Service};

/// Decides if a request may be passed on to the wrapped service.
pub trait AuthorizationPolicy: Send + Sync {
    fn is_authorized(&self, ctx: &RequestContext, unit: Unit, request: &Request<'_>) -> bool;
}

impl<F> AuthorizationPolicy for F
where
    F: Fn(&RequestContext, Unit, &Request<'_>) -> bool + Send + Sync,
{
    fn is_authorized(&self, ctx: &RequestContext, unit: Unit, request: &Request<'_>) -> bool {
        self(ctx, unit, request)
    }
}

/// Permissions of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Access {
    Read,
    ReadWrite,
}

const fn is_write(request: &Request<'_>) -> bool {
    use Request::*;

    match request {
        ReadCoils(..) | ReadDiscreteInputs(..) | ReadHoldingRegisters(..)
        | ReadInputRegisters(..) => false,
        WriteSingleCoil(..)
        | WriteSingleRegister(..)
        | WriteMultipleCoils(..)
        | WriteMultipleRegisters(..)
        | MaskWriteRegister(..)
        | ReadWriteMultipleRegisters(..) => true,
    }
}

/// Grants access by the role of the peer.
///
/// Peers without a role or with an unknown role are denied.
#[derive(Debug, Clone, Default)]
pub struct RoleBasedPolicy {
    roles: HashMap<String, Access>,
}

impl RoleBasedPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>, access: Access) -> Self {
        self.roles.insert(role.into(), access);
        self
    }

    #[must_use]
    pub fn access(&self, role: &str) -> Option<Access> {
        self.roles.get(role).copied()
    }
}

impl<R: Into<String>> FromIterator<(R, Access)> for RoleBasedPolicy {
    fn from_iter<T: IntoIterator<Item = (R, Access)>>(iter: T) -> Self {
        Self {
            roles: iter
                .into_iter()
                .map(|(role, access)| (role.into(), access))
                .collect(),
        }
    }
}

impl AuthorizationPolicy for RoleBasedPolicy {
    fn is_authorized(&self, ctx: &RequestContext, _unit: Unit, request: &Request<'_>) -> bool {
        let Some(access) = ctx.role.as_deref().and_then(|role| self.access(role)) else {
            return false;
        };
        match access {
            Access::ReadWrite => true,
            Access::Read => !is_write(request),
        }
    }
}

/// Wraps a [`Service`] and denies unauthorized requests with
/// [`ExceptionCode::IllegalFunction`].
#[derive(Debug, Clone)]
pub struct AuthorizingService<S, P> {
    service: S,
    policy: P,
}

impl<S, P> AuthorizingService<S, P> {
    pub const fn new(service: S, policy: P) -> Self {
        Self { service, policy }
    }

    pub const fn service(&self) -> &S {
        &self.service
    }

    pub fn into_inner(self) -> S {
        self.service
    }
}

impl<S, P: AuthorizationPolicy> AuthorizingService<S, P> {
    fn authorize(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        request: &Request<'_>,
    ) -> Result<(), ServiceError> {
        if self.policy.is_authorized(ctx, unit, request) {
            return Ok(());
        }
        log::warn!(
            "Denied function {} on unit {unit} for {:?} (role: {:?})",
            request.function_code(),
            ctx.remote_addr,
            ctx.role
        );
        Err(ExceptionResponse::new(request.function_code(), ExceptionCode::IllegalFunction).into())
    }
}

#[async_trait]
impl<S, P> Service for AuthorizingService<S, P>
where
    S: Service,
    P: AuthorizationPolicy,
{
    async fn read_coils(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>, ServiceError> {
        self.authorize(ctx, unit, &Request::ReadCoils(addr, cnt))?;
        self.service.read_coils(ctx, unit, addr, cnt).await
    }

    async fn read_discrete_inputs(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>, ServiceError> {
        self.authorize(ctx, unit, &Request::ReadDiscreteInputs(addr, cnt))?;
        self.service.read_discrete_inputs(ctx, unit, addr, cnt).await
    }

    async fn read_holding_registers(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, ServiceError> {
        self.authorize(ctx, unit, &Request::ReadHoldingRegisters(addr, cnt))?;
        self.service.read_holding_registers(ctx, unit, addr, cnt).await
    }

    async fn read_input_registers(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, ServiceError> {
        self.authorize(ctx, unit, &Request::ReadInputRegisters(addr, cnt))?;
        self.service.read_input_registers(ctx, unit, addr, cnt).await
    }

    async fn write_single_coil(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        coil: Coil,
    ) -> Result<(), ServiceError> {
        self.authorize(ctx, unit, &Request::WriteSingleCoil(addr, coil))?;
        self.service.write_single_coil(ctx, unit, addr, coil).await
    }

    async fn write_single_register(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        word: Word,
    ) -> Result<(), ServiceError> {
        self.authorize(ctx, unit, &Request::WriteSingleRegister(addr, word))?;
        self.service.write_single_register(ctx, unit, addr, word).await
    }

    async fn write_multiple_coils(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        coils: &[Coil],
    ) -> Result<(), ServiceError> {
        self.authorize(
            ctx,
            unit,
            &Request::WriteMultipleCoils(addr, Cow::Borrowed(coils)),
        )?;
        self.service.write_multiple_coils(ctx, unit, addr, coils).await
    }

    async fn write_multiple_registers(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        words: &[Word],
    ) -> Result<(), ServiceError> {
        self.authorize(
            ctx,
            unit,
            &Request::WriteMultipleRegisters(addr, Cow::Borrowed(words)),
        )?;
        self.service
            .write_multiple_registers(ctx, unit, addr, words)
            .await
    }

    async fn masked_write_register(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<(), ServiceError> {
        self.authorize(
            ctx,
            unit,
            &Request::MaskWriteRegister(addr, and_mask, or_mask),
        )?;
        self.service
            .masked_write_register(ctx, unit, addr, and_mask, or_mask)
            .await
    }

    async fn read_write_multiple_registers(
        &self,
        ctx: &RequestContext,
        unit: Unit,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        words: &[Word],
    ) -> Result<Vec<Word>, ServiceError> {
        self.authorize(
            ctx,
            unit,
            &Request::ReadWriteMultipleRegisters(
                read_addr,
                read_cnt,
                write_addr,
                Cow::Borrowed(words),
            ),
        )?;
        self.service
            .read_write_multiple_registers(ctx, unit, read_addr, read_cnt, write_addr, words)
            .await
    }
}
