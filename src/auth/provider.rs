use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::{Principal, Role},
    error::{ApiError, ApiResult},
};

/// Client for the external identity provider. A bearer token goes in,
/// a resolved principal (id, email, role) comes out.
#[derive(Clone)]
pub struct IdentityProvider {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

#[derive(Deserialize)]
struct AuthUser {
    id: Uuid,
    email: String,
    #[serde(default)]
    user_metadata: Metadata,
}

#[derive(Deserialize, Default)]
struct Metadata {
    role: Option<Role>,
}

impl IdentityProvider {
    pub fn new(base_url: String, service_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            service_key,
        }
    }

    pub async fn verify(&self, token: &str) -> ApiResult<Principal> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .header("apikey", &self.service_key)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "identity provider unreachable");
                ApiError::Authentication("token verification failed".to_owned())
            })?;

        if !response.status().is_success() {
            return Err(ApiError::Authentication("invalid token".to_owned()));
        }

        let user: AuthUser = response
            .json()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "malformed identity provider response");
                ApiError::Authentication("token verification failed".to_owned())
            })?;

        let role = user
            .user_metadata
            .role
            .ok_or_else(|| ApiError::Authorization("role not assigned to the user".to_owned()))?;

        Ok(Principal {
            id: user.id,
            email: user.email,
            role,
        })
    }
}
