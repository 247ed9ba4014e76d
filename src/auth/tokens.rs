use std::time::Duration;

use axum::extract::FromRef;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{internal, ApiError};
use crate::state::AppState;

pub const ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// "Keep me signed in" unchecked — session-length refresh (24 h).
pub const REFRESH_TTL_SHORT: Duration = Duration::from_secs(24 * 60 * 60);

/// "Keep me signed in" checked — long-lived refresh (30 days).
pub const REFRESH_TTL_LONG: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const REFRESH_SECRET_BYTES: usize = 48;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
}

/// HS256 signing material for access tokens, derived once from the
/// startup-validated secret.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl FromRef<AppState> for TokenKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.config.jwt_secret.as_bytes())
    }
}

impl TokenKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Signed, time-bounded identity assertion: {sub, iat, exp = iat + 15 min}.
    pub fn issue_access(&self, user_id: Uuid) -> Result<String, ApiError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id,
            iat: now as usize,
            exp: (now + ACCESS_TTL.as_secs() as i64) as usize,
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(internal)
    }

    /// Validates signature and expiry with zero clock-skew leeway; any
    /// failure collapses to one Unauthorized message.
    pub fn verify_access(&self, token: &str) -> Result<Uuid, ApiError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims.sub)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token"))
    }
}

/// Opaque refresh secret: 48 bytes from the OS RNG, URL-safe base64.
pub fn generate_refresh_secret() -> String {
    let mut bytes = [0u8; REFRESH_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 digest used as the storage lookup key. Raw secrets are never
/// persisted or logged.
pub fn hash_refresh_secret(secret: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(secret.as_bytes()))
}

/// A consumed refresh row whose lifetime exceeds the short policy was issued
/// with "remember me"; the replacement row inherits that intent. Inferred
/// from duration arithmetic rather than a persisted flag, matching the
/// client-visible behavior the frontend depends on.
pub fn is_long_lived(created_at: OffsetDateTime, expires_at: OffsetDateTime) -> bool {
    expires_at - created_at > time::Duration::seconds(REFRESH_TTL_SHORT.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TokenKeys {
        TokenKeys::new(b"0123456789abcdef0123456789abcdef")
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let token = keys.issue_access(user_id).expect("issue access");
        assert_eq!(keys.verify_access(&token).expect("verify"), user_id);
    }

    #[test]
    fn access_token_expires_fifteen_minutes_after_issue() {
        let keys = keys();
        let token = keys.issue_access(Uuid::new_v4()).unwrap();
        let mut validation = Validation::default();
        validation.leeway = 0;
        let claims = decode::<Claims>(&token, &keys.decoding, &validation)
            .unwrap()
            .claims;
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn rejects_expired_token() {
        let keys = keys();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            iat: (now - 1000) as usize,
            exp: (now - 100) as usize,
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).unwrap();
        assert!(keys.verify_access(&token).is_err());
    }

    #[test]
    fn rejects_wrong_signature_and_garbage() {
        let keys = keys();
        let other = TokenKeys::new(b"another-secret-another-secret-32");
        let token = other.issue_access(Uuid::new_v4()).unwrap();
        assert!(keys.verify_access(&token).is_err());
        assert!(keys.verify_access("not.a.jwt").is_err());
    }

    #[test]
    fn refresh_secrets_are_unique_and_full_entropy() {
        let a = generate_refresh_secret();
        let b = generate_refresh_secret();
        assert_ne!(a, b);
        let decoded = URL_SAFE_NO_PAD.decode(&a).expect("url-safe base64");
        assert_eq!(decoded.len(), REFRESH_SECRET_BYTES);
    }

    #[test]
    fn digest_is_deterministic_and_one_way() {
        let secret = generate_refresh_secret();
        let digest = hash_refresh_secret(&secret);
        assert_eq!(digest, hash_refresh_secret(&secret));
        assert_ne!(digest, secret);
        assert_ne!(digest, hash_refresh_secret("other"));
    }

    #[test]
    fn remember_me_inferred_from_row_lifetime() {
        let created = OffsetDateTime::now_utc();
        let short = created + time::Duration::seconds(REFRESH_TTL_SHORT.as_secs() as i64);
        let long = created + time::Duration::seconds(REFRESH_TTL_LONG.as_secs() as i64);
        assert!(!is_long_lived(created, short));
        assert!(is_long_lived(created, long));
    }
}
