pub mod suggestions;
pub mod tracker;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::warn;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::calendar::CalendarEventDraft;
use crate::pipeline::stages::Stage;
use crate::shared::auth;
use crate::shared::error::EngineError;
use crate::shared::models::{booking_outcome, tracking_status, Booking, Lead, Opportunity};
use crate::shared::schema::{bookings, leads, opportunities};
use crate::shared::state::AppState;

pub use suggestions::{AiSuggestionState, PostCallOutcome};
pub use tracker::run_meeting_sweep;

const BOOKING_TYPES: [&str; 3] = ["call1", "call2", "onboarding"];

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub opportunity_id: Uuid,
    pub booking_type: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessNotesRequest {
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub stage: Stage,
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), EngineError> {
    auth::require_user(&state, &headers).await?;
    if !BOOKING_TYPES.contains(&req.booking_type.as_str()) {
        return Err(EngineError::Validation(format!(
            "unknown booking type: {}",
            req.booking_type
        )));
    }

    let pool = state.conn.clone();
    let booking_req = CreateBookingRequest {
        opportunity_id: req.opportunity_id,
        booking_type: req.booking_type.clone(),
        scheduled_at: req.scheduled_at,
        duration_minutes: req.duration_minutes,
    };
    let (booking, lead) = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let opp: Opportunity = opportunities::table
            .find(booking_req.opportunity_id)
            .first(&mut conn)
            .optional()?
            .ok_or(EngineError::NotFound(
                "opportunity",
                booking_req.opportunity_id,
            ))?;
        let lead: Lead = leads::table
            .find(opp.lead_id)
            .first(&mut conn)
            .optional()?
            .ok_or(EngineError::NotFound("lead", opp.lead_id))?;

        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            opportunity_id: opp.id,
            booking_type: booking_req.booking_type,
            scheduled_at: booking_req.scheduled_at,
            duration_minutes: booking_req.duration_minutes.unwrap_or(30),
            outcome: booking_outcome::PENDING.to_string(),
            tracking_status: tracking_status::PENDING.to_string(),
            calendar_event_id: None,
            notes: None,
            ai_suggestion: AiSuggestionState::None.to_value(),
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(bookings::table)
            .values(&booking)
            .execute(&mut conn)?;
        Ok::<(Booking, Lead), EngineError>((booking, lead))
    })
    .await
    .map_err(|e| EngineError::Storage(format!("booking task failed: {e}")))??;

    // Calendar sync decorates the booking; the booking stands even when
    // the provider is down.
    let draft = calendar_draft(&booking, &lead);
    match state.calendar.create_event(&draft).await {
        Ok(event_id) => {
            let pool = state.conn.clone();
            let booking_id = booking.id;
            let stored_event_id = event_id.clone();
            let update = tokio::task::spawn_blocking(move || {
                let mut conn = pool
                    .get()
                    .map_err(|e| EngineError::Storage(e.to_string()))?;
                diesel::update(bookings::table.find(booking_id))
                    .set(bookings::calendar_event_id.eq(Some(stored_event_id)))
                    .execute(&mut conn)?;
                Ok::<(), EngineError>(())
            })
            .await
            .map_err(|e| EngineError::Storage(format!("calendar id update failed: {e}")))
            .and_then(|r| r);
            if let Err(e) = update {
                warn!(
                    "calendar event {event_id} not linked to booking {}: {e}",
                    booking.id
                );
            }
        }
        Err(e) => warn!("calendar sync failed for booking {}: {e}", booking.id),
    }

    Ok((StatusCode::CREATED, Json(booking)))
}

fn calendar_draft(booking: &Booking, lead: &Lead) -> CalendarEventDraft {
    CalendarEventDraft {
        title: format!(
            "{} with {} {}",
            booking.booking_type, lead.first_name, lead.last_name
        ),
        description: None,
        start: booking.scheduled_at,
        end: booking.scheduled_at + Duration::minutes(i64::from(booking.duration_minutes)),
        attendee_email: lead.email.clone(),
    }
}

pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<Booking>, EngineError> {
    auth::require_user(&state, &headers).await?;

    let pool = state.conn.clone();
    let (booking, lead) = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let mut booking: Booking = bookings::table
            .find(booking_id)
            .first(&mut conn)
            .optional()?
            .ok_or(EngineError::NotFound("booking", booking_id))?;
        let duration = req.duration_minutes.unwrap_or(booking.duration_minutes);
        diesel::update(bookings::table.find(booking_id))
            .set((
                bookings::scheduled_at.eq(req.scheduled_at),
                bookings::duration_minutes.eq(duration),
                bookings::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;
        booking.scheduled_at = req.scheduled_at;
        booking.duration_minutes = duration;

        let opp: Opportunity = opportunities::table
            .find(booking.opportunity_id)
            .first(&mut conn)?;
        let lead: Lead = leads::table.find(opp.lead_id).first(&mut conn)?;
        Ok::<(Booking, Lead), EngineError>((booking, lead))
    })
    .await
    .map_err(|e| EngineError::Storage(format!("reschedule task failed: {e}")))??;

    if let Some(event_id) = booking.calendar_event_id.clone() {
        let draft = calendar_draft(&booking, &lead);
        if let Err(e) = state.calendar.update_event(&event_id, &draft).await {
            warn!(
                "calendar sync failed while rescheduling booking {}: {e}",
                booking.id
            );
        }
    }

    Ok(Json(booking))
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Booking>, EngineError> {
    auth::require_user(&state, &headers).await?;
    let pool = state.conn.clone();
    let booking = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        bookings::table
            .find(booking_id)
            .first::<Booking>(&mut conn)
            .optional()?
            .ok_or(EngineError::NotFound("booking", booking_id))
    })
    .await
    .map_err(|e| EngineError::Storage(format!("booking lookup failed: {e}")))??;
    Ok(Json(booking))
}

pub async fn process_notes(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ProcessNotesRequest>,
) -> Result<Json<PostCallOutcome>, EngineError> {
    auth::require_user(&state, &headers).await?;
    if req.notes.trim().is_empty() {
        return Err(EngineError::Validation(
            "call notes must not be empty".to_string(),
        ));
    }
    let outcome = suggestions::process_post_call_notes(&state, booking_id, req.notes).await?;
    Ok(Json(outcome))
}

pub async fn confirm_suggestion(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<AiSuggestionState>, EngineError> {
    let user = auth::require_user(&state, &headers).await?;
    let resolved = suggestions::confirm(&state, booking_id, user.id).await?;
    Ok(Json(resolved))
}

pub async fn override_suggestion(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<OverrideRequest>,
) -> Result<Json<AiSuggestionState>, EngineError> {
    let user = auth::require_user(&state, &headers).await?;
    let resolved = suggestions::override_stage(&state, booking_id, req.stage, user.id).await?;
    Ok(Json(resolved))
}

pub async fn dismiss_suggestion(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<AiSuggestionState>, EngineError> {
    let user = auth::require_user(&state, &headers).await?;
    let resolved = suggestions::dismiss(&state, booking_id, user.id).await?;
    Ok(Json(resolved))
}

pub fn configure_meeting_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/bookings", post(create_booking))
        .route("/api/bookings/{id}", get(get_booking))
        .route("/api/bookings/{id}/reschedule", put(reschedule_booking))
        .route("/api/bookings/{id}/process-notes", post(process_notes))
        .route("/api/bookings/{id}/confirm", post(confirm_suggestion))
        .route("/api/bookings/{id}/override", post(override_suggestion))
        .route("/api/bookings/{id}/dismiss", post(dismiss_suggestion))
}
