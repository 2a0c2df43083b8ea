//! `ChatSync` development backend.
//!
//! # Usage
//!
//! ```bash
//! # Two users on the default address 127.0.0.1:3000
//! cargo run --bin chatsync-backend -- --user alice-token=alice --user bob-token=bob
//!
//! # Custom address
//! CHATSYNC_BACKEND_ADDR=0.0.0.0:8080 cargo run --bin chatsync-backend
//! ```

use std::sync::Arc;

use chatsync_backend::config::{BackendCliArgs, BackendConfig};
use chatsync_backend::routes;
use chatsync_backend::state::BackendState;
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = BackendCliArgs::parse();

    let config = match BackendConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if config.users.is_empty() {
        tracing::warn!("no users registered; every request will be unauthorized");
    }
    let state = config
        .users
        .iter()
        .fold(BackendState::new(), |state, (token, user)| {
            state.with_user(token.clone(), user.clone())
        });
    let state = Arc::new(state);

    tracing::info!(addr = %config.bind_addr, users = config.users.len(), "starting chatsync backend");

    match routes::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "backend listening");
            tokio::select! {
                result = handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "backend server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    state.close_all_connections().await;
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start backend");
            std::process::exit(1);
        }
    }
}
