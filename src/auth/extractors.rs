use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use super::tokens::TokenKeys;
use crate::error::ApiError;
use uuid::Uuid;

/// Extracts and validates the bearer access token, yielding the user ID.
pub struct AuthUser(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = TokenKeys::from_ref(state);

        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthorized(
                "Missing or invalid Authorization header",
            ))?;

        let token = auth.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized(
            "Missing or invalid Authorization header",
        ))?;

        keys.verify_access(token).map(AuthUser)
    }
}
