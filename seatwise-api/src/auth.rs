use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use seatwise_core::principal::{Principal, Role};

use crate::error::ApiError;

pub const USER_HEADER: &str = "x-seatwise-user";
pub const ROLE_HEADER: &str = "x-seatwise-role";

/// The authenticated caller, as asserted by the identity layer upstream
/// (a gateway or auth proxy that has already verified credentials and
/// attaches the user id and role as headers). Missing or malformed headers
/// reject with 401; authorization proper happens in the engine.
#[derive(Debug, Clone, Copy)]
pub struct AuthPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_value(parts, USER_HEADER)?
            .parse::<Uuid>()
            .map_err(|_| {
                ApiError::Unauthenticated(format!("{} is not a valid uuid", USER_HEADER))
            })?;
        let role = header_value(parts, ROLE_HEADER)?
            .parse::<Role>()
            .map_err(ApiError::Unauthenticated)?;
        Ok(AuthPrincipal(Principal::new(id, role)))
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| ApiError::Unauthenticated(format!("missing {} header", name)))?
        .to_str()
        .map_err(|_| ApiError::Unauthenticated(format!("invalid {} header", name)))
}
