use std::sync::Arc;

use axum::{extract::Extension, routing::post, Json, Router};
use tokio_util::sync::CancellationToken;

use crate::messages::{ScanRunRequest, ScanViewMessage};
use crate::orchestrator::ScanOrchestrator;

pub fn api_routes() -> Router {
    Router::new().route("/api/scans", post(run_scan))
}

/// Run one scan to a terminal state. Errors travel inside the message
/// contract, so this handler always answers 200 with a command envelope.
pub async fn run_scan(
    Extension(orchestrator): Extension<Arc<ScanOrchestrator>>,
    Json(request): Json<ScanRunRequest>,
) -> Json<ScanViewMessage> {
    let cancel = CancellationToken::new();
    Json(orchestrator.run(request, &cancel).await)
}
