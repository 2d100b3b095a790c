//! `RelayServer`: Axum router, listener, and graceful stop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, HeaderName};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::ConnectionMeta;
use relay_hub::Hub;
use relay_settings::RelaySettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::websocket::{ConnectParams, session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub every route talks to.
    pub hub: Arc<Hub>,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
    /// Outbound queue depth for new sockets.
    pub outbound_buffer: usize,
    /// Largest inbound frame accepted.
    pub max_message_bytes: usize,
}

/// HTTP + WebSocket front of a [`Hub`].
pub struct RelayServer {
    hub: Arc<Hub>,
    settings: RelaySettings,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server. Nothing is bound until [`RelayServer::listen`].
    pub fn new(hub: Arc<Hub>, settings: RelaySettings, metrics: PrometheusHandle) -> Self {
        Self {
            hub,
            settings,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            outbound_buffer: self.settings.transport.outbound_buffer,
            max_message_bytes: self.settings.transport.max_message_bytes,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .route("/tenants/{tenant_id}/events", post(api::publish_event))
            .route(
                "/tenants/{tenant_id}/notifications",
                post(api::publish_notification),
            )
            .route(
                "/tenants/{tenant_id}/connections",
                get(api::list_connections),
            )
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Serving stops once the hub's shutdown token is cancelled.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let router = self.router();
        let stop = self.hub.shutdown_token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(%local, "relay server listening");
        Ok((local, handle))
    }

    /// The hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The settings the server was built with.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.registry().len(),
        state.hub.shutdown_token().is_cancelled(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// GET /ws?userId=…&tenantId=…
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let meta = ConnectionMeta {
        user_agent: header(USER_AGENT),
        source_address: header(HeaderName::from_static("x-forwarded-for")),
    };
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| {
            session::run(socket, state.hub, params, meta, state.outbound_buffer)
        })
}
