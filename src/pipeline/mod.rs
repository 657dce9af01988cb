pub mod routing;
pub mod stages;
pub mod tasks;
pub mod transitions;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::auth;
use crate::shared::error::EngineError;
use crate::shared::models::{Opportunity, StageLogEntry};
use crate::shared::schema::opportunities;
use crate::shared::state::AppState;

pub use stages::Stage;
pub use transitions::{TransitionOutcome, TransitionRequest};

#[derive(Debug, Deserialize)]
pub struct ManualTransitionRequest {
    pub to_stage: Stage,
    pub rationale: Option<String>,
    pub expected_from: Option<Stage>,
}

#[derive(Debug, Serialize)]
pub struct StageInfo {
    pub stage: Stage,
    pub position: usize,
    pub response_target_hours: i64,
}

/// Manual stage change by the owning human; the audit row carries their
/// user id and rationale.
pub async fn manual_transition(
    State(state): State<Arc<AppState>>,
    Path(opportunity_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ManualTransitionRequest>,
) -> Result<Json<TransitionOutcome>, EngineError> {
    let user = auth::require_user(&state, &headers).await?;
    let outcome = transitions::transition(
        &state,
        TransitionRequest {
            opportunity_id,
            to_stage: req.to_stage,
            actor_id: Some(user.id),
            rationale: req
                .rationale
                .unwrap_or_else(|| "manual stage change".to_string()),
            expected_from: req.expected_from,
        },
    )
    .await?;
    Ok(Json(outcome))
}

pub async fn get_opportunity(
    State(state): State<Arc<AppState>>,
    Path(opportunity_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Opportunity>, EngineError> {
    auth::require_user(&state, &headers).await?;
    let pool = state.conn.clone();
    let opp = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        opportunities::table
            .find(opportunity_id)
            .first::<Opportunity>(&mut conn)
            .optional()?
            .ok_or(EngineError::NotFound("opportunity", opportunity_id))
    })
    .await
    .map_err(|e| EngineError::Storage(format!("opportunity lookup failed: {e}")))??;
    Ok(Json(opp))
}

/// The append-only transition history; its final entry always matches
/// the opportunity's current stage.
pub async fn stage_log_handler(
    State(state): State<Arc<AppState>>,
    Path(opportunity_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Vec<StageLogEntry>>, EngineError> {
    auth::require_user(&state, &headers).await?;
    let pool = state.conn.clone();
    let entries = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        transitions::stage_history(&mut conn, opportunity_id)
    })
    .await
    .map_err(|e| EngineError::Storage(format!("stage log lookup failed: {e}")))??;
    Ok(Json(entries))
}

pub async fn list_stages() -> Json<Vec<StageInfo>> {
    let stages = Stage::ALL
        .iter()
        .map(|stage| StageInfo {
            stage: *stage,
            position: stage.position(),
            response_target_hours: stage.response_target().num_hours(),
        })
        .collect();
    Json(stages)
}

pub fn configure_pipeline_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/pipeline/stages", get(list_stages))
        .route("/api/opportunities/{id}", get(get_opportunity))
        .route(
            "/api/opportunities/{id}/transition",
            post(manual_transition),
        )
        .route("/api/opportunities/{id}/stage-log", get(stage_log_handler))
}
