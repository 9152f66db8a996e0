//! HTTP handlers translating S3 requests into `GatewayService` calls.

pub mod bucket_handlers;
pub mod health_handlers;
pub mod object_handlers;
pub mod xml;

use crate::services::catalog::resolve_account;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use std::convert::Infallible;

/// Account id of the caller, taken from the `Authorization` header.
///
/// Never rejects: a missing or malformed header yields the default account.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        Ok(Caller(resolve_account(authorization)))
    }
}
