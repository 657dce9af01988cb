use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::pipeline::stages::Stage;
use crate::pipeline::transitions::{self, TransitionRequest};
use crate::shared::error::EngineError;
use crate::shared::models::{Booking, Opportunity, PostCallAction};
use crate::shared::schema::{bookings, opportunities, post_call_actions};
use crate::shared::state::AppState;

pub mod action_type {
    pub const SYSTEM_AUTO: &str = "system_auto";
    pub const OWNER_CONFIRM: &str = "owner_confirm";
    pub const OWNER_OVERRIDE: &str = "owner_override";
    pub const OWNER_DISMISS: &str = "owner_dismiss";
}

/// Disposition state of a booking's AI suggestion. Stored as tagged JSON
/// on the booking row; the tags make resolved states distinct from a
/// pending one, so confirming an already-dismissed suggestion cannot be
/// expressed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AiSuggestionState {
    None,
    Suggested {
        /// `None` means the classifier saw no reason to move the stage.
        stage: Option<Stage>,
        confidence: f64,
        reasoning: String,
        /// Opportunity stage at suggestion time; replayed as the
        /// optimistic guard when the owner confirms later.
        observed_stage: Stage,
        suggested_at: DateTime<Utc>,
    },
    Confirmed {
        stage: Stage,
        resolved_at: DateTime<Utc>,
    },
    Overridden {
        suggested: Option<Stage>,
        actual: Stage,
        resolved_at: DateTime<Utc>,
    },
    Dismissed {
        resolved_at: DateTime<Utc>,
    },
}

impl AiSuggestionState {
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(AiSuggestionState::None)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "state": "none" }))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Suggested { .. } => "suggested",
            Self::Confirmed { .. } => "confirmed",
            Self::Overridden { .. } => "overridden",
            Self::Dismissed { .. } => "dismissed",
        }
    }

    pub fn suggested_stage(&self) -> Option<Stage> {
        match self {
            Self::Suggested { stage, .. } => *stage,
            _ => None,
        }
    }

    /// What a confirm would apply: the suggested stage, the stage the
    /// suggestion was made against, and the confidence for the audit row.
    pub fn confirm_target(&self) -> Result<(Stage, Stage, f64), EngineError> {
        match self {
            Self::Suggested {
                stage: Some(stage),
                observed_stage,
                confidence,
                ..
            } => Ok((*stage, *observed_stage, *confidence)),
            Self::Suggested { stage: None, .. } => Err(EngineError::Validation(
                "suggestion proposed no change; there is no stage to confirm".to_string(),
            )),
            Self::None => Err(EngineError::Validation(
                "no suggestion awaiting disposition".to_string(),
            )),
            resolved => Err(EngineError::Conflict {
                expected: "suggested".to_string(),
                actual: resolved.name().to_string(),
            }),
        }
    }

    pub fn check_dismissible(&self) -> Result<(), EngineError> {
        match self {
            Self::Suggested { .. } => Ok(()),
            Self::None => Err(EngineError::Validation(
                "no suggestion awaiting disposition".to_string(),
            )),
            resolved => Err(EngineError::Conflict {
                expected: "suggested".to_string(),
                actual: resolved.name().to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuggestionReply {
    pub stage: Option<Stage>,
    pub confidence: f64,
    pub reasoning: String,
}

/// Parses the classifier's `{stage, confidence, reasoning}` verdict.
/// `"no_change"` maps to no target stage; anything else must be a member
/// of the stage registry.
pub fn parse_reply(value: &Value) -> Result<SuggestionReply, EngineError> {
    let stage_str = value
        .get("stage")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::External("classifier reply has no stage field".to_string()))?;
    let stage = if stage_str == "no_change" {
        None
    } else {
        Some(Stage::from_str(stage_str).map_err(|_| {
            EngineError::External(format!("classifier proposed unknown stage {stage_str}"))
        })?)
    };
    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    Ok(SuggestionReply {
        stage,
        confidence,
        reasoning,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PostCallOutcome {
    AutoApplied { stage: Stage, confidence: f64 },
    Stored { stage: Option<Stage>, confidence: f64 },
}

async fn with_conn<T, F>(state: &Arc<AppState>, f: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, EngineError> + Send + 'static,
{
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| EngineError::Storage(format!("db task failed: {e}")))?
}

fn load_booking_context(
    conn: &mut PgConnection,
    booking_id: Uuid,
) -> Result<(Booking, Opportunity), EngineError> {
    let booking: Booking = bookings::table
        .find(booking_id)
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound("booking", booking_id))?;
    let opportunity: Opportunity = opportunities::table
        .find(booking.opportunity_id)
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound("opportunity", booking.opportunity_id))?;
    Ok((booking, opportunity))
}

fn store_suggestion_state(
    conn: &mut PgConnection,
    booking_id: Uuid,
    suggestion: &AiSuggestionState,
) -> Result<(), EngineError> {
    diesel::update(bookings::table.find(booking_id))
        .set((
            bookings::ai_suggestion.eq(suggestion.to_value()),
            bookings::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn record_action(
    conn: &mut PgConnection,
    booking_id: Uuid,
    opportunity_id: Uuid,
    action: &str,
    suggested: Option<Stage>,
    actual: Option<Stage>,
    confidence: Option<f64>,
    rationale: String,
    actor_id: Option<Uuid>,
) -> Result<(), EngineError> {
    let row = PostCallAction {
        id: Uuid::new_v4(),
        booking_id,
        opportunity_id,
        action_type: action.to_string(),
        suggested_stage: suggested.map(|s| s.to_string()),
        actual_stage: actual.map(|s| s.to_string()),
        confidence,
        rationale,
        actor_id,
        created_at: Utc::now(),
    };
    diesel::insert_into(post_call_actions::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

fn classification_context(booking: &Booking, opportunity: &Opportunity, notes: &str) -> Value {
    let stage = Stage::from_str(&opportunity.stage).ok();
    let hours_in_stage = (Utc::now() - opportunity.updated_at).num_hours();
    serde_json::json!({
        "instruction": "You review sales call notes. Reply with JSON: \
            {\"stage\": \"<pipeline stage or no_change>\", \"confidence\": <0..1>, \
            \"reasoning\": \"<one sentence>\"}. \
            Valid stages: new_enquiry, call1_scheduled, qualified, call2_scheduled, \
            proposal_agreed, awaiting_deposit, deposit_paid, onboarding_scheduled, \
            onboarding_complete, production, installation, completed.",
        "context": {
            "booking_type": booking.booking_type,
            "scheduled_at": booking.scheduled_at,
            "current_stage": opportunity.stage,
            "hours_in_stage": hours_in_stage,
            "stage_response_target_hours": stage.map(|s| s.response_target().num_hours()),
            "value_estimate_pence": opportunity.value_estimate,
            "call_notes": notes,
        }
    })
}

/// Turns raw call notes into a stage suggestion. High-confidence verdicts
/// are applied straight away; everything else is parked on the booking
/// for the owner, superseding any dangling earlier suggestion.
pub async fn process_post_call_notes(
    state: &Arc<AppState>,
    booking_id: Uuid,
    notes: String,
) -> Result<PostCallOutcome, EngineError> {
    let saved_notes = notes.clone();
    let (booking, opportunity) = with_conn(state, move |conn| {
        let (booking, opportunity) = load_booking_context(conn, booking_id)?;
        diesel::update(bookings::table.find(booking_id))
            .set((
                bookings::notes.eq(Some(saved_notes)),
                bookings::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        Ok((booking, opportunity))
    })
    .await?;

    let current = Stage::from_str(&opportunity.stage)?;
    let request = classification_context(&booking, &opportunity, &notes);
    let verdict = state.llm.classify(&request).await?;
    let reply = parse_reply(&verdict)?;

    let threshold = state.config.inference.auto_apply_threshold;
    if let Some(target) = reply.stage {
        if target != current && reply.confidence >= threshold {
            let transition_req = TransitionRequest {
                opportunity_id: opportunity.id,
                to_stage: target,
                actor_id: None,
                rationale: format!("post-call classification: {}", reply.reasoning),
                expected_from: Some(current),
            };
            match transitions::transition(state, transition_req).await {
                Ok(_) => {
                    let confidence = reply.confidence;
                    let reasoning = reply.reasoning.clone();
                    with_conn(state, move |conn| {
                        store_suggestion_state(conn, booking_id, &AiSuggestionState::None)?;
                        record_action(
                            conn,
                            booking_id,
                            opportunity.id,
                            action_type::SYSTEM_AUTO,
                            Some(target),
                            Some(target),
                            Some(confidence),
                            reasoning,
                            None,
                        )
                    })
                    .await?;
                    info!(
                        "auto-applied stage {target} on opportunity {} (confidence {:.2})",
                        opportunity.id, reply.confidence
                    );
                    return Ok(PostCallOutcome::AutoApplied {
                        stage: target,
                        confidence: reply.confidence,
                    });
                }
                Err(EngineError::Conflict { actual, .. }) => {
                    // Someone moved the stage mid-classification; park the
                    // suggestion for the owner instead of forcing it.
                    warn!(
                        "auto-apply skipped for booking {booking_id}: stage moved to {actual} \
                         during classification"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    let suggestion = AiSuggestionState::Suggested {
        stage: reply.stage,
        confidence: reply.confidence,
        reasoning: reply.reasoning.clone(),
        observed_stage: current,
        suggested_at: Utc::now(),
    };
    let stored = suggestion.clone();
    with_conn(state, move |conn| {
        store_suggestion_state(conn, booking_id, &stored)
    })
    .await?;

    Ok(PostCallOutcome::Stored {
        stage: reply.stage,
        confidence: reply.confidence,
    })
}

/// Owner accepts the suggestion as-is. The stage observed at suggestion
/// time rides along as the optimistic guard, so a suggestion that has
/// gone stale fails with a conflict instead of overwriting newer state.
pub async fn confirm(
    state: &Arc<AppState>,
    booking_id: Uuid,
    actor_id: Uuid,
) -> Result<AiSuggestionState, EngineError> {
    let (booking, opportunity) =
        with_conn(state, move |conn| load_booking_context(conn, booking_id)).await?;
    let stored = AiSuggestionState::from_value(&booking.ai_suggestion);
    let (target, observed, confidence) = stored.confirm_target()?;

    transitions::transition(
        state,
        TransitionRequest {
            opportunity_id: opportunity.id,
            to_stage: target,
            actor_id: Some(actor_id),
            rationale: "owner confirmed post-call suggestion".to_string(),
            expected_from: Some(observed),
        },
    )
    .await?;

    let resolved = AiSuggestionState::Confirmed {
        stage: target,
        resolved_at: Utc::now(),
    };
    let to_store = resolved.clone();
    with_conn(state, move |conn| {
        store_suggestion_state(conn, booking_id, &to_store)?;
        record_action(
            conn,
            booking_id,
            opportunity.id,
            action_type::OWNER_CONFIRM,
            Some(target),
            Some(target),
            Some(confidence),
            "owner confirmed suggested stage".to_string(),
            Some(actor_id),
        )
    })
    .await?;
    Ok(resolved)
}

/// Owner moves the opportunity somewhere other than what was suggested.
/// The audit row keeps both stages so the delta is queryable.
pub async fn override_stage(
    state: &Arc<AppState>,
    booking_id: Uuid,
    target: Stage,
    actor_id: Uuid,
) -> Result<AiSuggestionState, EngineError> {
    let (booking, opportunity) =
        with_conn(state, move |conn| load_booking_context(conn, booking_id)).await?;
    let stored = AiSuggestionState::from_value(&booking.ai_suggestion);
    let suggested = stored.suggested_stage();

    transitions::transition(
        state,
        TransitionRequest {
            opportunity_id: opportunity.id,
            to_stage: target,
            actor_id: Some(actor_id),
            rationale: "owner override of post-call suggestion".to_string(),
            expected_from: None,
        },
    )
    .await?;

    let resolved = AiSuggestionState::Overridden {
        suggested,
        actual: target,
        resolved_at: Utc::now(),
    };
    let to_store = resolved.clone();
    with_conn(state, move |conn| {
        store_suggestion_state(conn, booking_id, &to_store)?;
        record_action(
            conn,
            booking_id,
            opportunity.id,
            action_type::OWNER_OVERRIDE,
            suggested,
            Some(target),
            None,
            "owner overrode suggested stage".to_string(),
            Some(actor_id),
        )
    })
    .await?;
    Ok(resolved)
}

/// Owner discards the suggestion; the stage stays where it is.
pub async fn dismiss(
    state: &Arc<AppState>,
    booking_id: Uuid,
    actor_id: Uuid,
) -> Result<AiSuggestionState, EngineError> {
    let (booking, opportunity) =
        with_conn(state, move |conn| load_booking_context(conn, booking_id)).await?;
    let stored = AiSuggestionState::from_value(&booking.ai_suggestion);
    stored.check_dismissible()?;
    let suggested = stored.suggested_stage();

    let resolved = AiSuggestionState::Dismissed {
        resolved_at: Utc::now(),
    };
    let to_store = resolved.clone();
    with_conn(state, move |conn| {
        store_suggestion_state(conn, booking_id, &to_store)?;
        record_action(
            conn,
            booking_id,
            opportunity.id,
            action_type::OWNER_DISMISS,
            suggested,
            None,
            None,
            "owner dismissed suggestion".to_string(),
            Some(actor_id),
        )
    })
    .await?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggested(stage: Option<Stage>) -> AiSuggestionState {
        AiSuggestionState::Suggested {
            stage,
            confidence: 0.7,
            reasoning: "signals of qualification".to_string(),
            observed_stage: Stage::Call1Scheduled,
            suggested_at: Utc::now(),
        }
    }

    #[test]
    fn json_roundtrip_keeps_the_tag() {
        let state = suggested(Some(Stage::Qualified));
        let value = state.to_value();
        assert_eq!(value["state"], "suggested");
        assert_eq!(value["stage"], "qualified");
        assert_eq!(AiSuggestionState::from_value(&value), state);
    }

    #[test]
    fn unparseable_blob_degrades_to_none() {
        let state = AiSuggestionState::from_value(&serde_json::json!({ "bogus": true }));
        assert_eq!(state, AiSuggestionState::None);
    }

    #[test]
    fn confirm_needs_a_concrete_stage() {
        let (stage, observed, _) = suggested(Some(Stage::Qualified)).confirm_target().unwrap();
        assert_eq!(stage, Stage::Qualified);
        assert_eq!(observed, Stage::Call1Scheduled);

        let err = suggested(None).confirm_target().unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn confirm_after_resolution_conflicts() {
        let dismissed = AiSuggestionState::Dismissed {
            resolved_at: Utc::now(),
        };
        assert_eq!(dismissed.confirm_target().unwrap_err().kind(), "conflict");
        assert_eq!(dismissed.check_dismissible().unwrap_err().kind(), "conflict");

        let confirmed = AiSuggestionState::Confirmed {
            stage: Stage::Qualified,
            resolved_at: Utc::now(),
        };
        assert_eq!(confirmed.confirm_target().unwrap_err().kind(), "conflict");
    }

    #[test]
    fn confirm_without_suggestion_is_invalid() {
        assert_eq!(
            AiSuggestionState::None.confirm_target().unwrap_err().kind(),
            "validation"
        );
        assert_eq!(
            AiSuggestionState::None
                .check_dismissible()
                .unwrap_err()
                .kind(),
            "validation"
        );
    }

    #[test]
    fn reply_parsing_handles_no_change_and_unknowns() {
        let reply = parse_reply(&serde_json::json!({
            "stage": "qualified", "confidence": 0.83, "reasoning": "budget agreed"
        }))
        .unwrap();
        assert_eq!(reply.stage, Some(Stage::Qualified));
        assert!((reply.confidence - 0.83).abs() < f64::EPSILON);

        let no_change = parse_reply(&serde_json::json!({
            "stage": "no_change", "confidence": 1.4
        }))
        .unwrap();
        assert_eq!(no_change.stage, None);
        assert_eq!(no_change.confidence, 1.0);

        let err = parse_reply(&serde_json::json!({ "stage": "closed_lost" })).unwrap_err();
        assert_eq!(err.kind(), "external_failure");

        let missing = parse_reply(&serde_json::json!({ "confidence": 0.5 })).unwrap_err();
        assert_eq!(missing.kind(), "external_failure");
    }
}
