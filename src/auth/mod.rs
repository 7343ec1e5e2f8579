use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod code;
pub(crate) mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod limiter;
pub mod memory;
pub mod oauth;
pub mod password;
pub mod registration;
pub mod repo;
pub mod repo_types;
pub mod session;
pub mod validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::oauth_routes())
        .merge(handlers::me_routes())
}
