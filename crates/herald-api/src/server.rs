//! Router, middleware and server lifecycle.
//!
//! Requests flow through middleware in order:
//! 1. Request id generation
//! 2. Request/response tracing
//! 3. Timeout enforcement
//! 4. Handler execution

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use herald_core::Clock;
use herald_delivery::BatchScheduler;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::handlers;

/// Response header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Scheduler driven by `/process` and read by `/stats`.
    pub scheduler: Arc<BatchScheduler>,
    /// Source of response timestamps.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates handler state.
    pub fn new(scheduler: Arc<BatchScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self { scheduler, clock }
    }
}

/// Builds the control plane router.
///
/// `request_timeout` bounds every request, including a full `/process`
/// batch, so it should exceed the batch deadline plus one delivery timeout.
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/process", post(handlers::process_batch))
        .route("/stats", get(handlers::stats))
        .fallback(handlers::not_found)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Serves the router on `addr` until `shutdown` resolves, then drains
/// in-flight requests.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn start_server<F>(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state, request_timeout);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "control plane listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("control plane stopped");
    Ok(())
}

/// Resolves on CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
