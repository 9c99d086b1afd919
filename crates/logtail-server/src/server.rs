//! `LogtailServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use logtail_bus::LogBus;
use logtail_settings::LogtailSettings;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::context::GatewayContext;
use crate::dispatcher::Dispatcher;
use crate::handlers::default_dispatcher;
use crate::health::{self, HealthResponse};
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::streamer::StreamerConfig;
use crate::websocket::{TransportConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: GatewayContext,
    pub dispatcher: Arc<Dispatcher>,
    pub transport: TransportConfig,
    pub max_message_size: usize,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
    /// `None` disables `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// The log tailing gateway server.
pub struct LogtailServer {
    settings: LogtailSettings,
    ctx: GatewayContext,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    started_at: DateTime<Utc>,
    metrics: Option<PrometheusHandle>,
}

impl LogtailServer {
    /// Server with the default action table.
    pub fn new(settings: LogtailSettings, bus: Arc<dyn LogBus>) -> Self {
        Self::with_dispatcher(settings, bus, default_dispatcher())
    }

    /// Server with a custom action table.
    pub fn with_dispatcher(settings: LogtailSettings, bus: Arc<dyn LogBus>, dispatcher: Dispatcher) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let ctx = GatewayContext::new(
            Arc::new(SessionRegistry::new()),
            bus,
            StreamerConfig::from(&settings.streamer),
        )
        .with_tracker(shutdown.tasks());
        Self {
            settings,
            ctx,
            dispatcher: Arc::new(dispatcher),
            shutdown,
            start_time: Instant::now(),
            started_at: Utc::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            transport: TransportConfig::from(&self.settings.server),
            max_message_size: self.settings.server.max_message_size,
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            started_at: self.started_at,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind `host:port` (port 0 picks a free one) and serve until the
    /// shutdown token is cancelled.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let bind = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = tokio::net::TcpListener::bind(&bind).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, "logtail server listening");
        Ok((addr, handle))
    }

    /// Stop accepting, close every session and wait for streamers.
    ///
    /// Returns `false` if streamers were still running at the timeout.
    pub async fn shutdown_gracefully(&self) -> bool {
        self.shutdown.shutdown();
        let closed = self.ctx.registry.close_all();
        info!(sessions = closed, "closed sessions for shutdown");
        self.shutdown
            .graceful_shutdown(self.settings.server.shutdown_timeout())
            .await
    }

    pub fn context(&self) -> &GatewayContext {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn settings(&self) -> &LogtailSettings {
        &self.settings
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.started_at,
        state.ctx.registry.len(),
        state.ctx.active_streamers(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let AppState {
        ctx,
        dispatcher,
        transport,
        max_message_size,
        ..
    } = state;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, ctx, dispatcher, transport))
}
