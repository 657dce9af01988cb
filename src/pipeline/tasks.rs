use chrono::Utc;
use diesel::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::pipeline::stages::Stage;
use crate::pipeline::transitions::TransitionOutcome;
use crate::shared::error::EngineError;
use crate::shared::models::{task_status, Task};
use crate::shared::schema::tasks;
use crate::shared::state::AppState;

/// Follow-up a stage entry asks of the owner, if any. Due times come from
/// the stage's response target so staleness is measurable per stage.
pub fn task_for_stage(stage: Stage) -> Option<(&'static str, &'static str)> {
    match stage {
        Stage::NewEnquiry => Some(("contact_lead", "Contact new enquiry")),
        Stage::Qualified => Some(("book_call2", "Book the second call")),
        Stage::ProposalAgreed => Some(("send_deposit_request", "Send the deposit request")),
        Stage::DepositPaid => Some(("schedule_onboarding", "Schedule the onboarding session")),
        Stage::OnboardingComplete => Some(("confirm_production", "Confirm production slot")),
        Stage::Installation => Some(("book_sign_off", "Book the installation sign-off visit")),
        _ => None,
    }
}

pub fn create_stage_task(
    conn: &mut PgConnection,
    opportunity_id: Uuid,
    owner_id: Option<Uuid>,
    stage: Stage,
) -> Result<Option<Task>, EngineError> {
    let Some((task_type, title)) = task_for_stage(stage) else {
        return Ok(None);
    };
    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4(),
        opportunity_id,
        task_type: task_type.to_string(),
        title: title.to_string(),
        status: task_status::OPEN.to_string(),
        due_at: Some(now + stage.response_target()),
        owner_id,
        created_at: now,
        completed_at: None,
    };
    diesel::insert_into(tasks::table)
        .values(&task)
        .execute(conn)?;
    Ok(Some(task))
}

/// Stage-entry side effect invoked after a committed transition.
pub async fn generate_stage_tasks(
    state: &Arc<AppState>,
    outcome: &TransitionOutcome,
) -> Result<(), EngineError> {
    let pool = state.conn.clone();
    let opportunity_id = outcome.opportunity_id;
    let owner_id = outcome.owner_id;
    let stage = outcome.to_stage;
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        create_stage_task(&mut conn, opportunity_id, owner_id, stage)?;
        Ok::<(), EngineError>(())
    })
    .await
    .map_err(|e| EngineError::Storage(format!("task generation failed: {e}")))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actionable_stages_open_tasks() {
        assert_eq!(task_for_stage(Stage::NewEnquiry).unwrap().0, "contact_lead");
        assert_eq!(task_for_stage(Stage::Qualified).unwrap().0, "book_call2");
        assert!(task_for_stage(Stage::Call1Scheduled).is_none());
        assert!(task_for_stage(Stage::Completed).is_none());
    }
}
