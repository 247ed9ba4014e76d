use anyhow::{bail, Context};

/// Minimum length for the access-token signing secret. Checked once at
/// startup; the process refuses to serve traffic with a weak secret.
const MIN_JWT_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub cors_origin: String,
    pub host: String,
    pub port: u16,
    pub production: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET is required")?;
        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "https://budgeto.app".into());
        let host = std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = std::env::var("APP_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(4000);
        let production = std::env::var("APP_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        Self::new(database_url, jwt_secret, cors_origin, host, port, production)
    }

    pub fn new(
        database_url: String,
        jwt_secret: String,
        cors_origin: String,
        host: String,
        port: u16,
        production: bool,
    ) -> anyhow::Result<Self> {
        if jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes");
        }
        Ok(Self {
            database_url,
            jwt_secret,
            cors_origin,
            host,
            port,
            production,
        })
    }
}
