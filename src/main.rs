mod app;
mod auth;
mod budget;
mod config;
mod error;
mod ratelimit;
mod state;
mod store;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "budgeto=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    // Config problems (missing DATABASE_URL, weak JWT_SECRET) abort here,
    // before the listener ever opens.
    let state = AppState::init().await?;

    // Bound the bucket map for idle clients.
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ratelimit::PURGE_INTERVAL);
        loop {
            interval.tick().await;
            limiter.purge_idle();
        }
    });

    let host = state.config.host.clone();
    let port = state.config.port;
    let app = app::build_app(state);
    app::serve(app, &host, port).await
}
