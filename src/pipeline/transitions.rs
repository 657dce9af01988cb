use chrono::Utc;
use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::pipeline::stages::Stage;
use crate::shared::error::EngineError;
use crate::shared::models::{Opportunity, StageLogEntry};
use crate::shared::schema::{opportunities, stage_log};
use crate::shared::state::AppState;

/// Command object for a stage change. Every producer (human handler, AI
/// workflow, webhook, sweep) builds one of these and goes through
/// [`transition`]; nothing else writes `opportunities.stage`.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub opportunity_id: Uuid,
    pub to_stage: Stage,
    pub actor_id: Option<Uuid>,
    pub rationale: String,
    /// Optimistic-concurrency guard: when set, the transition only commits
    /// if the opportunity is still at this stage.
    pub expected_from: Option<Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub opportunity_id: Uuid,
    pub lead_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub log_id: Uuid,
}

pub fn check_expected(current: Stage, expected: Option<Stage>) -> Result<(), EngineError> {
    match expected {
        Some(expected) if expected != current => Err(EngineError::Conflict {
            expected: expected.to_string(),
            actual: current.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Applies a transition inside one transaction. The opportunity row is
/// locked for the duration, so concurrent requests for the same
/// opportunity serialize here while other opportunities proceed freely.
/// Exactly one stage_log row is appended per committed call.
pub fn apply_transition(
    conn: &mut PgConnection,
    req: &TransitionRequest,
) -> Result<TransitionOutcome, EngineError> {
    conn.transaction::<TransitionOutcome, EngineError, _>(|conn| {
        let opp: Opportunity = opportunities::table
            .find(req.opportunity_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(EngineError::NotFound("opportunity", req.opportunity_id))?;

        let current = Stage::from_str(&opp.stage)?;
        check_expected(current, req.expected_from)?;

        let now = Utc::now();
        diesel::update(opportunities::table.find(opp.id))
            .set((
                opportunities::stage.eq(req.to_stage.to_string()),
                opportunities::updated_at.eq(now),
            ))
            .execute(conn)?;

        if req.to_stage == Stage::DepositPaid && opp.deposit_paid_at.is_none() {
            diesel::update(opportunities::table.find(opp.id))
                .set(opportunities::deposit_paid_at.eq(Some(now)))
                .execute(conn)?;
        }
        if req.to_stage == Stage::Completed && opp.completed_at.is_none() {
            diesel::update(opportunities::table.find(opp.id))
                .set(opportunities::completed_at.eq(Some(now)))
                .execute(conn)?;
        }

        let entry = StageLogEntry {
            id: Uuid::new_v4(),
            opportunity_id: opp.id,
            from_stage: Some(current.to_string()),
            to_stage: req.to_stage.to_string(),
            actor_id: req.actor_id,
            rationale: req.rationale.clone(),
            created_at: now,
        };
        diesel::insert_into(stage_log::table)
            .values(&entry)
            .execute(conn)?;

        Ok(TransitionOutcome {
            opportunity_id: opp.id,
            lead_id: opp.lead_id,
            owner_id: opp.owner_id,
            from_stage: current,
            to_stage: req.to_stage,
            log_id: entry.id,
        })
    })
}

/// Commits the stage change, then fires the stage-entry side effects.
/// Side effects run after commit and are logged on failure rather than
/// rolled back into the transition; callers retry them through the
/// normal sweeps, never by replaying the transition.
pub async fn transition(
    state: &Arc<AppState>,
    req: TransitionRequest,
) -> Result<TransitionOutcome, EngineError> {
    let pool = state.conn.clone();
    let blocking_req = req.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        apply_transition(&mut conn, &blocking_req)
    })
    .await
    .map_err(|e| EngineError::Storage(format!("transition task failed: {e}")))??;

    if let Err(e) = crate::messaging::scheduler::enqueue_stage_entry(state, &outcome).await {
        warn!(
            "stage message enqueue failed for opportunity {}: {}",
            outcome.opportunity_id, e
        );
    }
    if let Err(e) = crate::pipeline::tasks::generate_stage_tasks(state, &outcome).await {
        warn!(
            "stage task generation failed for opportunity {}: {}",
            outcome.opportunity_id, e
        );
    }
    if outcome.to_stage == Stage::AwaitingDeposit {
        if let Err(e) = crate::billing::issue_deposit_link(state, outcome.opportunity_id).await {
            warn!(
                "deposit link creation failed for opportunity {}: {}",
                outcome.opportunity_id, e
            );
        }
    }
    if outcome.to_stage.is_terminal() && !outcome.from_stage.is_terminal() {
        if let Some(owner_id) = outcome.owner_id {
            let pool = state.conn.clone();
            let released = tokio::task::spawn_blocking(move || {
                let mut conn = pool
                    .get()
                    .map_err(|e| EngineError::Storage(e.to_string()))?;
                crate::pipeline::routing::release_owner(&mut conn, owner_id)
            })
            .await
            .map_err(|e| EngineError::Storage(format!("owner release failed: {e}")))
            .and_then(|r| r);
            if let Err(e) = released {
                warn!("owner {owner_id} load not released: {e}");
            }
        }
    }

    Ok(outcome)
}

pub fn stage_history(
    conn: &mut PgConnection,
    opportunity_id: Uuid,
) -> Result<Vec<StageLogEntry>, EngineError> {
    let entries = stage_log::table
        .filter(stage_log::opportunity_id.eq(opportunity_id))
        .order(stage_log::created_at.asc())
        .load::<StageLogEntry>(conn)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_expected_from_passes() {
        assert!(check_expected(Stage::Qualified, Some(Stage::Qualified)).is_ok());
    }

    #[test]
    fn absent_expected_from_passes() {
        assert!(check_expected(Stage::Production, None).is_ok());
    }

    #[test]
    fn stale_expected_from_is_a_conflict() {
        let err = check_expected(Stage::DepositPaid, Some(Stage::AwaitingDeposit)).unwrap_err();
        assert_eq!(err.kind(), "conflict");
        match err {
            EngineError::Conflict { expected, actual } => {
                assert_eq!(expected, "awaiting_deposit");
                assert_eq!(actual, "deposit_paid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
