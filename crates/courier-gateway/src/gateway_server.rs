use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use courier_discord::DiscordRestClient;
use courier_dispatch::{
    DispatchEngine, DispatchError, PlatformError, ProgressEvent,
};
use ed25519_dalek::VerifyingKey;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

mod console_handlers;
mod console_page;
mod interactions_handler;
mod types;

use console_handlers::{
    handle_console_dispatch, handle_console_group, handle_console_page, handle_console_roles,
    handle_console_sessions, handle_console_stop,
};
use interactions_handler::handle_interaction;
use types::{ConsoleDispatchRequest, ConsoleStopRequest, GatewayApiError, SseFrame};

pub const CONSOLE_PAGE_ENDPOINT: &str = "/";
pub const CONSOLE_GROUP_ENDPOINT: &str = "/api/group";
pub const CONSOLE_ROLES_ENDPOINT: &str = "/api/roles";
pub const CONSOLE_DISPATCH_ENDPOINT: &str = "/api/dispatch";
pub const CONSOLE_STOP_ENDPOINT: &str = "/api/stop";
pub const CONSOLE_SESSIONS_ENDPOINT: &str = "/api/sessions";
pub const INTERACTIONS_ENDPOINT: &str = "/interactions";
pub const DEFAULT_CONSOLE_SESSION_ID: &str = "web-console";
pub const DEFAULT_GATEWAY_BIND: &str = "127.0.0.1:8080";

#[derive(Clone)]
/// Discord interactions endpoint settings; absent when the endpoint is disabled.
pub struct InteractionsConfig {
    pub public_key: VerifyingKey,
    pub discord: DiscordRestClient,
    pub allowed_channel_id: Option<String>,
}

#[derive(Clone)]
pub struct GatewayServerConfig {
    pub bind: String,
    pub group_id: String,
    pub status_channel_id: Option<String>,
    pub interactions: Option<InteractionsConfig>,
}

/// Shared state behind every gateway route.
pub struct GatewayServerState {
    config: GatewayServerConfig,
    engine: DispatchEngine,
    pending_role_selections: Mutex<HashMap<String, Vec<String>>>,
}

impl GatewayServerState {
    pub fn new(config: GatewayServerConfig, engine: DispatchEngine) -> Self {
        Self {
            config,
            engine,
            pending_role_selections: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    fn pending_roles(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.pending_role_selections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn status_channel_id(&self) -> Option<String> {
        self.config
            .status_channel_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Binds and serves the gateway until Ctrl-C.
pub async fn run_gateway_server(config: GatewayServerConfig, engine: DispatchEngine) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid gateway bind address '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    info!(
        addr = %local_addr,
        interactions = config.interactions.is_some(),
        "gateway server listening"
    );

    let state = Arc::new(GatewayServerState::new(config, engine));
    let app = build_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")?;
    info!("gateway server stopped");
    Ok(())
}

pub fn build_gateway_router(state: Arc<GatewayServerState>) -> Router {
    Router::new()
        .route(CONSOLE_PAGE_ENDPOINT, get(handle_console_page))
        .route(CONSOLE_GROUP_ENDPOINT, get(handle_console_group))
        .route(CONSOLE_ROLES_ENDPOINT, get(handle_console_roles))
        .route(CONSOLE_DISPATCH_ENDPOINT, post(handle_console_dispatch))
        .route(CONSOLE_STOP_ENDPOINT, post(handle_console_stop))
        .route(CONSOLE_SESSIONS_ENDPOINT, get(handle_console_sessions))
        .route(INTERACTIONS_ENDPOINT, post(handle_interaction))
        .with_state(state)
}

fn parse_gateway_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, GatewayApiError> {
    serde_json::from_slice::<T>(body).map_err(|error| {
        GatewayApiError::bad_request(
            "malformed_json",
            format!("failed to parse request body: {error}"),
        )
    })
}
