mod dto;
pub mod extractors;
pub mod handlers;
pub mod password;
pub mod tokens;

use axum::Router;

use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::auth_routes(state)
}
