use axum::{
    extract::{FromRef, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{AuthResponse, LoginRequest, PublicUser, RefreshResponse, RegisterRequest};
use super::password::{hash_password, verify_password};
use super::tokens::{self, TokenKeys, REFRESH_TTL_LONG, REFRESH_TTL_SHORT};
use crate::error::ApiError;
use crate::ratelimit::{self, LOGIN_POLICY, REGISTER_POLICY};
use crate::state::AppState;
use crate::store::StoreError;

pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
const REFRESH_COOKIE_PATH: &str = "/api/auth";

const INVALID_CREDENTIALS: &str = "Invalid email or password";
// One message for missing, unknown, expired and already-rotated tokens.
const INVALID_REFRESH: &str = "Invalid or expired refresh token";

pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let register_limit = {
        let limiter = state.limiter.clone();
        middleware::from_fn(move |req: Request, next: Next| {
            ratelimit::admit(limiter.clone(), REGISTER_POLICY, req, next)
        })
    };
    let login_limit = {
        let limiter = state.limiter.clone();
        middleware::from_fn(move |req: Request, next: Next| {
            ratelimit::admit(limiter.clone(), LOGIN_POLICY, req, next)
        })
    };

    Router::new()
        .merge(
            Router::new()
                .route("/register", post(register))
                .route_layer(register_limit),
        )
        .merge(
            Router::new()
                .route("/login", post(login))
                .route_layer(login_limit),
        )
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() <= 255 && EMAIL_RE.is_match(email)
}

/// Creates a refresh row and returns the jar with the secret set as an
/// HTTP-only, same-site-strict cookie scoped to the auth path. Remember-me
/// sessions get a Max-Age; otherwise the cookie dies with the browser session.
async fn issue_refresh_token(
    state: &AppState,
    jar: CookieJar,
    user_id: Uuid,
    remember_me: bool,
) -> Result<CookieJar, (CookieJar, ApiError)> {
    let secret = tokens::generate_refresh_secret();
    let token_hash = tokens::hash_refresh_secret(&secret);
    let ttl = if remember_me {
        REFRESH_TTL_LONG
    } else {
        REFRESH_TTL_SHORT
    };
    let expires_at = OffsetDateTime::now_utc() + time::Duration::seconds(ttl.as_secs() as i64);

    if let Err(e) = state
        .store
        .insert_refresh_token(user_id, &token_hash, expires_at)
        .await
    {
        return Err((jar, e.into()));
    }

    let mut cookie = Cookie::build((REFRESH_COOKIE_NAME, secret))
        .http_only(true)
        .secure(state.config.production)
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .build();
    if remember_me {
        cookie.set_max_age(time::Duration::seconds(ttl.as_secs() as i64));
    }
    Ok(jar.add(cookie))
}

fn clear_refresh_cookie(jar: CookieJar) -> CookieJar {
    let mut cookie = Cookie::from(REFRESH_COOKIE_NAME);
    cookie.set_path(REFRESH_COOKIE_PATH);
    jar.remove(cookie)
}

#[instrument(skip_all)]
async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ApiError> {
    let email = payload.email.trim().to_lowercase();

    if !is_valid_email(&email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }
    if payload.password.len() < 8 || payload.password.len() > 128 {
        return Err(ApiError::Validation(
            "Password must be between 8 and 128 characters".into(),
        ));
    }

    // Pre-check for a friendly 409; the unique constraint still backs this up.
    if state.store.find_user_by_email(&email).await?.is_some() {
        warn!("registration with taken email");
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let password_hash = hash_password(&payload.password)?;
    let user = state
        .store
        .create_user(&email, &password_hash)
        .await
        .map_err(|e| match e {
            StoreError::Conflict => ApiError::Conflict("Email already registered".into()),
            other => other.into(),
        })?;

    let access_token = TokenKeys::from_ref(&state).issue_access(user.id)?;
    let jar = issue_refresh_token(&state, jar, user.id, false)
        .await
        .map_err(|(_, e)| e)?;

    info!(user_id = %user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse {
            access_token,
            user: PublicUser {
                id: user.id,
                email: user.email,
            },
        }),
    ))
}

#[instrument(skip_all)]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let email = payload.email.trim().to_lowercase();

    if !is_valid_email(&email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }
    if payload.password.is_empty() || payload.password.len() > 128 {
        return Err(ApiError::Validation("Invalid password".into()));
    }

    // Unknown email and wrong password answer identically so the endpoint
    // cannot be used to enumerate accounts.
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or(ApiError::Unauthorized(INVALID_CREDENTIALS))?;

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    }

    let access_token = TokenKeys::from_ref(&state).issue_access(user.id)?;
    let jar = issue_refresh_token(&state, jar, user.id, payload.remember_me)
        .await
        .map_err(|(_, e)| e)?;

    info!(user_id = %user.id, "user logged in");
    Ok((
        jar,
        Json(AuthResponse {
            access_token,
            user: PublicUser {
                id: user.id,
                email: user.email,
            },
        }),
    ))
}

// Silent refresh — the frontend calls this on startup and on 401 responses
// to extend the session without forcing a re-login.
#[instrument(skip_all)]
async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<RefreshResponse>), (CookieJar, ApiError)> {
    let secret = jar
        .get(REFRESH_COOKIE_NAME)
        .map(|c| c.value().to_owned());
    let Some(secret) = secret else {
        return Err((jar, ApiError::Unauthorized(INVALID_REFRESH)));
    };

    let token_hash = tokens::hash_refresh_secret(&secret);
    let stored = match state.store.find_refresh_token(&token_hash).await {
        Ok(row) => row,
        Err(e) => return Err((jar, e.into())),
    };
    let Some(stored) = stored else {
        return Err((clear_refresh_cookie(jar), ApiError::Unauthorized(INVALID_REFRESH)));
    };

    if stored.expires_at < OffsetDateTime::now_utc() {
        // Stale row: clean it up and clear the cookie.
        if let Err(e) = state.store.delete_refresh_token(stored.id).await {
            return Err((jar, e.into()));
        }
        return Err((clear_refresh_cookie(jar), ApiError::Unauthorized(INVALID_REFRESH)));
    }

    // Rotation: the consumed row is destroyed before a replacement exists.
    // Zero rows affected means a concurrent refresh won the race; this caller
    // must not mint tokens from a row it did not delete.
    let deleted = match state.store.delete_refresh_token(stored.id).await {
        Ok(deleted) => deleted,
        Err(e) => return Err((jar, e.into())),
    };
    if !deleted {
        warn!(user_id = %stored.user_id, "lost refresh rotation race");
        return Err((clear_refresh_cookie(jar), ApiError::Unauthorized(INVALID_REFRESH)));
    }

    let remember_me = tokens::is_long_lived(stored.created_at, stored.expires_at);
    let access_token = TokenKeys::from_ref(&state)
        .issue_access(stored.user_id)
        .map_err(|e| (jar.clone(), e))?;
    let jar = issue_refresh_token(&state, jar, stored.user_id, remember_me).await?;

    info!(user_id = %stored.user_id, "refresh token rotated");
    Ok((jar, Json(RefreshResponse { access_token })))
}

#[instrument(skip_all)]
async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    if let Some(cookie) = jar.get(REFRESH_COOKIE_NAME) {
        let token_hash = tokens::hash_refresh_secret(cookie.value());
        // Absent row is fine; logout is idempotent.
        state.store.delete_refresh_token_by_hash(&token_hash).await?;
    }
    Ok((clear_refresh_cookie(jar), Json(json!({ "success": true }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_app;
    use axum::body::Body;
    use axum::http::{header, Request, Response, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::COOKIE, cookie.to_string())
            .body(Body::empty())
            .unwrap()
    }

    fn register_req(email: &str, password: &str) -> Request<Body> {
        post_json(
            "/api/auth/register",
            json!({ "email": email, "password": password }),
        )
    }

    async fn json_body(resp: Response<Body>) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }

    /// "refresh_token=<secret>" pair from the Set-Cookie header.
    fn cookie_pair(resp: &Response<Body>) -> Option<String> {
        let raw = resp.headers().get(header::SET_COOKIE)?.to_str().ok()?;
        raw.split(';').next().map(str::to_string)
    }

    #[tokio::test]
    async fn register_sets_http_only_cookie_and_keeps_secret_out_of_body() {
        let app = build_app(AppState::fake());
        let resp = app
            .oneshot(register_req("User@Example.com ", "password123"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let set_cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.starts_with("refresh_token="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Strict"));
        assert!(set_cookie.contains("Path=/api/auth"));
        // Session-length grant: no Max-Age without remember-me.
        assert!(!set_cookie.contains("Max-Age"));

        let body = json_body(resp).await;
        assert!(body["accessToken"].is_string());
        assert_eq!(body["user"]["email"], "user@example.com");
        assert!(body.get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn register_rejects_weak_input() {
        let app = build_app(AppState::fake());
        let resp = app
            .clone()
            .oneshot(register_req("not-an-email", "password123"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(register_req("a@b.co", "short"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_case_insensitively() {
        let app = build_app(AppState::fake());
        let resp = app
            .clone()
            .oneshot(register_req("a@b.co", "password123"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .oneshot(register_req("A@B.CO", "password123"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn login_answers_identically_for_unknown_email_and_wrong_password() {
        let app = build_app(AppState::fake());
        app.clone()
            .oneshot(register_req("a@b.co", "password123"))
            .await
            .unwrap();

        let wrong_pw = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                json!({ "email": "a@b.co", "password": "wrong-password" }),
            ))
            .await
            .unwrap();
        let unknown = app
            .oneshot(post_json(
                "/api/auth/login",
                json!({ "email": "nobody@b.co", "password": "password123" }),
            ))
            .await
            .unwrap();

        assert_eq!(wrong_pw.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(wrong_pw).await, json_body(unknown).await);
    }

    #[tokio::test]
    async fn remember_me_controls_cookie_max_age() {
        let app = build_app(AppState::fake());
        app.clone()
            .oneshot(register_req("a@b.co", "password123"))
            .await
            .unwrap();

        let resp = app
            .oneshot(post_json(
                "/api/auth/login",
                json!({ "email": "a@b.co", "password": "password123", "rememberMe": true }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let set_cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(set_cookie.contains("Max-Age"));
    }

    #[tokio::test]
    async fn refresh_rotates_and_consumed_secret_is_dead() {
        let app = build_app(AppState::fake());
        let resp = app
            .clone()
            .oneshot(register_req("a@b.co", "password123"))
            .await
            .unwrap();
        let first = cookie_pair(&resp).unwrap();

        let resp = app
            .clone()
            .oneshot(post_with_cookie("/api/auth/refresh", &first))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let second = cookie_pair(&resp).unwrap();
        assert_ne!(first, second);
        let body = json_body(resp).await;
        assert!(body["accessToken"].is_string());

        // The consumed secret must not work a second time.
        let resp = app
            .clone()
            .oneshot(post_with_cookie("/api/auth/refresh", &first))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // The replacement still does.
        let resp = app
            .oneshot(post_with_cookie("/api/auth/refresh", &second))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn refresh_without_cookie_is_unauthorized() {
        let app = build_app(AppState::fake());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn expired_refresh_row_is_deleted_and_cookie_cleared() {
        let state = AppState::fake();
        let app = build_app(state.clone());

        let user = state.store.create_user("a@b.co", "irrelevant").await.unwrap();
        let secret = tokens::generate_refresh_secret();
        let token_hash = tokens::hash_refresh_secret(&secret);
        state
            .store
            .insert_refresh_token(
                user.id,
                &token_hash,
                OffsetDateTime::now_utc() - time::Duration::hours(1),
            )
            .await
            .unwrap();

        let resp = app
            .oneshot(post_with_cookie(
                "/api/auth/refresh",
                &format!("refresh_token={secret}"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        // Stale row cleaned up during the lookup.
        assert!(state
            .store
            .find_refresh_token(&token_hash)
            .await
            .unwrap()
            .is_none());
        // Clearing cookie carries Max-Age=0.
        let set_cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(set_cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_kills_the_session() {
        let app = build_app(AppState::fake());

        // No cookie at all still succeeds.
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/logout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, json!({ "success": true }));

        let resp = app
            .clone()
            .oneshot(register_req("a@b.co", "password123"))
            .await
            .unwrap();
        let cookie = cookie_pair(&resp).unwrap();

        let resp = app
            .clone()
            .oneshot(post_with_cookie("/api/auth/logout", &cookie))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // The grant is gone; refresh with the old secret fails.
        let resp = app
            .oneshot(post_with_cookie("/api/auth/refresh", &cookie))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_endpoint_is_rate_limited_with_retry_hint() {
        let app = build_app(AppState::fake());
        // Invalid email keeps these cheap; admission runs before validation.
        for _ in 0..5 {
            let resp = app
                .clone()
                .oneshot(register_req("not-an-email", "password123"))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        let resp = app
            .oneshot(register_req("not-an-email", "password123"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "60");
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email(&format!("{}@example.com", "x".repeat(250))));
    }
}
