//! Identity extraction at the HTTP boundary.
//!
//! Authentication itself lives in the upstream gateway, which verifies the
//! session and injects `X-User-Id` / `X-User-Role` headers before a request
//! reaches this service. Every core operation receives the requester
//! explicitly; nothing below this module reads ambient request state.

use std::fmt;
use std::str::FromStr;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    Seller,
    Admin,
}

impl FromStr for UserRole {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(UserRole::Customer),
            "seller" => Ok(UserRole::Seller),
            "admin" => Ok(UserRole::Admin),
            other => Err(ServiceError::Unauthorized(format!(
                "unknown role: {other}"
            ))),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UserRole::Customer => "customer",
            UserRole::Seller => "seller",
            UserRole::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// The authenticated requester, as asserted by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    pub fn new(id: Uuid, role: UserRole) -> Self {
        Self { id, role }
    }

    /// Rejects requests whose asserted role does not match the operation.
    pub fn require_role(&self, role: UserRole) -> Result<(), ServiceError> {
        if self.role == role || self.role == UserRole::Admin {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "operation requires the {role} role"
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing user identity".to_string()))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| ServiceError::Unauthorized("malformed user id".to_string()))?;

        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing user role".to_string()))?
            .parse::<UserRole>()?;

        Ok(AuthUser::new(id, role))
    }
}
