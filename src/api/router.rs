//! Router and listener for the broker endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{any, get},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use crate::app::AppState;

use super::socket::ws_handler;

/// Assemble the broker router: the bidirectional endpoint at `/` plus
/// health probes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let middleware = ServiceBuilder::new().layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let health_routes = Router::new()
        .route("/live", get(liveness_handler))
        .route("/ready", get(readiness_handler));

    Router::new()
        .route("/", any(ws_handler))
        .nest("/health", health_routes)
        .layer(middleware)
        .with_state(state)
}

/// Liveness probe
async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: the broker is ready when the registry RPC answers.
async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.registry.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Bind the configured port and serve, wrapped in TLS when material is
/// present.
pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let router = create_router(Arc::clone(&state));

    match &state.config.ssl {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
            info!(addr = %addr, "Broker listening (tls)");
            axum_server::bind_rustls(addr, rustls)
                .serve(router.into_make_service())
                .await
        }
        None => {
            info!(addr = %addr, "Broker listening");
            axum_server::bind(addr)
                .serve(router.into_make_service())
                .await
        }
    }
}
