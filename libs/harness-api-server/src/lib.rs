mod error;
mod http;
mod runs;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;

use harness_core::Harness;

pub use error::ApiError;
pub use runs::{RunRegistry, RunView};

#[derive(Clone)]
pub struct AppState {
    pub harness: Arc<Harness>,
    pub runs: Arc<RunRegistry>,
}

impl AppState {
    pub fn new(harness: Arc<Harness>) -> Self {
        Self {
            harness,
            runs: Arc::new(RunRegistry::default()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/test-realtime", post(http::handle_start_run))
        .route(
            "/api/runs",
            post(http::handle_start_run).get(http::handle_list_runs),
        )
        .route(
            "/api/runs/{id}",
            get(http::handle_get_run).delete(http::handle_reset_run),
        )
        .with_state(state)
}

/// HTTP control surface harness'а.
pub async fn run(port: u16, state: AppState, shutdown: CancellationToken) -> Result<(), String> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}
