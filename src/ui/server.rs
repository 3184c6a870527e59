//! HTTP control server

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::error::NetworkError;
use crate::mixer::MixerHandle;
use crate::ui::handlers;

/// Shared state for handlers
pub struct AppState {
    pub mixer: MixerHandle,
    pub state_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(mixer: MixerHandle, state_path: PathBuf) -> Self {
        Self {
            mixer,
            state_path,
            started_at: Utc::now(),
        }
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route(
            "/api/channels",
            get(handlers::get_channels).post(handlers::attach_channel),
        )
        .route("/api/channels/:name", delete(handlers::detach_channel))
        .route("/api/channels/:name/gain", put(handlers::set_gain))
        .route("/api/channels/:name/mute", put(handlers::set_mute))
        .route("/api/channels/:name/delay", put(handlers::set_delay))
        .route("/api/master", put(handlers::set_master))
        .route("/api/effects/restore", post(handlers::restore_effects))
        .route("/api/effects/:name", put(handlers::set_effect))
        .route("/api/output", put(handlers::set_output))
        .route("/api/levels", get(handlers::get_levels))
        .route("/api/state/save", post(handlers::save_state))
        .route("/api/state/load", post(handlers::load_state))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Web server for the control API
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    pub fn address(&self) -> Result<SocketAddr, NetworkError> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| NetworkError::BindFailed(format!("{}", e)))
    }

    /// Serve until the task is dropped
    pub async fn run(self) -> Result<(), NetworkError> {
        let addr = self.address()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

        tracing::info!("Control API listening on http://{}", addr);

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))
    }

    /// Spawn the server on the current tokio runtime
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Web server error: {}", e);
            }
        })
    }
}
