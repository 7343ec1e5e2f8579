mod app;
mod auth;
mod clock;
mod config;
mod db;
mod error;
mod mail;
mod state;
mod users;

use std::time::Duration;

use crate::{auth::code::spawn_sweeper, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "scriptphi_auth=debug,axum=info,tower_http=info".to_string());
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

    let app_state = AppState::init().await?;

    let every = app_state.config.code_sweep_interval_secs;
    if every > 0 {
        spawn_sweeper(app_state.clone(), Duration::from_secs(every));
    }

    let app = app::build_app(app_state);
    app::serve(app).await
}
