use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::messaging::scheduler::{self, Trigger};
use crate::pipeline::routing::assign_owner;
use crate::pipeline::stages::Stage;
use crate::pipeline::tasks::create_stage_task;
use crate::shared::auth;
use crate::shared::error::EngineError;
use crate::shared::models::{Lead, Opportunity, StageLogEntry};
use crate::shared::schema::{leads, opportunities, stage_log};
use crate::shared::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct IntakeLeadRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub postcode: String,
    pub project_type: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub value_estimate: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct IntakeResponse {
    pub lead_id: Uuid,
    pub opportunity_id: Uuid,
    pub owner_id: Option<Uuid>,
}

pub fn validate_intake(req: &IntakeLeadRequest) -> Result<(), EngineError> {
    if req.first_name.trim().is_empty() && req.last_name.trim().is_empty() {
        return Err(EngineError::Validation(
            "a lead needs at least one name".to_string(),
        ));
    }
    if req.postcode.trim().is_empty() {
        return Err(EngineError::Validation(
            "a lead needs a postcode".to_string(),
        ));
    }
    let has_email = req.email.as_deref().map(|e| !e.trim().is_empty()).unwrap_or(false);
    let has_phone = req.phone.as_deref().map(|p| !p.trim().is_empty()).unwrap_or(false);
    if !has_email && !has_phone {
        return Err(EngineError::Validation(
            "a lead needs an email address or a phone number".to_string(),
        ));
    }
    Ok(())
}

/// Lead + Opportunity + first stage-log entry + first task land in one
/// transaction; a lead is never visible without its pipeline instance.
fn create_intake(
    conn: &mut PgConnection,
    req: &IntakeLeadRequest,
) -> Result<IntakeResponse, EngineError> {
    conn.transaction::<IntakeResponse, EngineError, _>(|conn| {
        let owner_id = match assign_owner(conn, &req.postcode) {
            Ok(owner) => Some(owner),
            Err(EngineError::NoAvailableOwner) => {
                warn!("no sales owner available, lead will be created unassigned");
                None
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let lead = Lead {
            id: Uuid::new_v4(),
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            email: req.email.clone().filter(|e| !e.trim().is_empty()),
            phone: req.phone.clone().filter(|p| !p.trim().is_empty()),
            postcode: req.postcode.trim().to_string(),
            project_type: req.project_type.clone(),
            source: req.source.clone(),
            notes: req.notes.clone(),
            opted_out: false,
            owner_id,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(leads::table).values(&lead).execute(conn)?;

        let opportunity = Opportunity {
            id: Uuid::new_v4(),
            lead_id: lead.id,
            stage: Stage::NewEnquiry.to_string(),
            owner_id,
            value_estimate: req.value_estimate,
            deposit_paid_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(opportunities::table)
            .values(&opportunity)
            .execute(conn)?;

        let entry = StageLogEntry {
            id: Uuid::new_v4(),
            opportunity_id: opportunity.id,
            from_stage: None,
            to_stage: Stage::NewEnquiry.to_string(),
            actor_id: None,
            rationale: format!(
                "lead intake via {}",
                req.source.as_deref().unwrap_or("webhook")
            ),
            created_at: now,
        };
        diesel::insert_into(stage_log::table)
            .values(&entry)
            .execute(conn)?;

        create_stage_task(conn, opportunity.id, owner_id, Stage::NewEnquiry)?;

        Ok(IntakeResponse {
            lead_id: lead.id,
            opportunity_id: opportunity.id,
            owner_id,
        })
    })
}

/// Shared-secret lead intake webhook, rate limited per source address.
pub async fn intake_lead(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<IntakeLeadRequest>,
) -> Result<(StatusCode, Json<IntakeResponse>), EngineError> {
    auth::verify_intake_secret(&state, &headers)?;
    if state
        .intake_limiter
        .check_key(&addr.ip().to_string())
        .is_err()
    {
        return Err(EngineError::RateLimited);
    }
    validate_intake(&req)?;

    let pool = state.conn.clone();
    let blocking_req = req.clone();
    let response = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        create_intake(&mut conn, &blocking_req)
    })
    .await
    .map_err(|e| EngineError::Storage(format!("intake task failed: {e}")))??;

    info!(
        "lead {} created at new_enquiry, owner {:?}",
        response.lead_id, response.owner_id
    );

    // Onboarding messages ride on the committed intake; a template or
    // storage hiccup here is logged, not surfaced to the webhook caller.
    if let Err(e) = scheduler::enqueue(
        &state,
        Trigger::Stage(Stage::NewEnquiry),
        response.lead_id,
        Some(response.opportunity_id),
    )
    .await
    {
        warn!(
            "onboarding messages not queued for lead {}: {e}",
            response.lead_id
        );
    }

    Ok((StatusCode::CREATED, Json(response)))
}

/// Marks the lead opted out. The row stays; the dispatcher refuses to
/// contact it from now on.
pub async fn opt_out_lead(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, EngineError> {
    auth::require_user(&state, &headers).await?;
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let updated = diesel::update(leads::table.find(lead_id))
            .set((
                leads::opted_out.eq(true),
                leads::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(EngineError::NotFound("lead", lead_id));
        }
        Ok(())
    })
    .await
    .map_err(|e| EngineError::Storage(format!("opt-out task failed: {e}")))??;
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_intake_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/intake/lead", post(intake_lead))
        .route("/api/leads/{id}/opt-out", post(opt_out_lead))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> IntakeLeadRequest {
        IntakeLeadRequest {
            first_name: "Ana".to_string(),
            last_name: "Briggs".to_string(),
            email: Some("ana@example.com".to_string()),
            phone: None,
            postcode: "WA1 1AA".to_string(),
            project_type: None,
            source: Some("website".to_string()),
            notes: None,
            value_estimate: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate_intake(&request()).is_ok());
    }

    #[test]
    fn some_contact_channel_is_required() {
        let mut req = request();
        req.email = None;
        req.phone = Some("  ".to_string());
        assert_eq!(validate_intake(&req).unwrap_err().kind(), "validation");

        req.phone = Some("07000000000".to_string());
        assert!(validate_intake(&req).is_ok());
    }

    #[test]
    fn postcode_and_name_are_required() {
        let mut req = request();
        req.postcode = "".to_string();
        assert_eq!(validate_intake(&req).unwrap_err().kind(), "validation");

        let mut req = request();
        req.first_name = "".to_string();
        req.last_name = " ".to_string();
        assert_eq!(validate_intake(&req).unwrap_err().kind(), "validation");
    }
}
