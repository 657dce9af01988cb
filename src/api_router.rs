//! Combines the API surface of every module into one router: the intake
//! webhook, the payment webhook, the sweep endpoints, the pipeline and
//! booking operations, plus health.

use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::shared::state::AppState;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(crate::intake::configure_intake_routes())
        .merge(crate::pipeline::configure_pipeline_routes())
        .merge(crate::meetings::configure_meeting_routes())
        .merge(crate::billing::configure_billing_routes())
        .merge(crate::automation::configure_sweep_routes())
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
