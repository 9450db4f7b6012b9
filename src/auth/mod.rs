mod provider;

pub use provider::IdentityProvider;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    error::{ApiError, ApiResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Merchant,
    Superadmin,
}

/// Pure role gate. Superadmin passes every gate.
pub fn permits(required: &[Role], actual: Role) -> bool {
    actual == Role::Superadmin || required.contains(&actual)
}

/// The authenticated identity attached to a request or live connection.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub id: uuid::Uuid,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn require(&self, required: &[Role]) -> ApiResult<()> {
        if permits(required, self.role) {
            Ok(())
        } else {
            Err(ApiError::Authorization("insufficient role privileges".to_owned()))
        }
    }
}

pub fn bearer_token(parts: &Parts) -> ApiResult<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Authentication("missing bearer token".to_owned()))
}

impl<S> FromRequestParts<S> for Principal
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?.to_owned();
        let state = AppState::from_ref(state);
        state.identity.verify(&token).await
    }
}
