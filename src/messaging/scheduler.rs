use chrono::{Duration, Utc};
use diesel::prelude::*;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

use crate::pipeline::stages::Stage;
use crate::pipeline::transitions::TransitionOutcome;
use crate::shared::error::EngineError;
use crate::shared::models::{message_status, MessageLogEntry, MessageTemplate};
use crate::shared::schema::{message_log, message_templates};
use crate::shared::state::AppState;

/// What caused a message to be scheduled: entering a stage, or a named
/// event such as `no_show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Stage(Stage),
    Event(String),
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stage(_) => "stage",
            Self::Event(_) => "event",
        }
    }

    pub fn value(&self) -> String {
        match self {
            Self::Stage(stage) => stage.to_string(),
            Self::Event(name) => name.clone(),
        }
    }
}

/// Expands every active template matching the trigger into queued
/// message_log rows, one per template channel. The body stored here is
/// the raw template; placeholders resolve at dispatch time.
pub fn enqueue_for_trigger(
    conn: &mut PgConnection,
    trigger: &Trigger,
    lead_id: Uuid,
    opportunity_id: Option<Uuid>,
) -> Result<usize, EngineError> {
    let templates: Vec<MessageTemplate> = message_templates::table
        .filter(message_templates::is_active.eq(true))
        .filter(message_templates::trigger_kind.eq(trigger.kind()))
        .filter(message_templates::trigger_value.eq(trigger.value()))
        .order(message_templates::sort_order.asc())
        .load(conn)?;

    let now = Utc::now();
    let mut queued = 0;
    for template in &templates {
        let scheduled_for = if template.delay_minutes > 0 {
            Some(now + Duration::minutes(i64::from(template.delay_minutes)))
        } else {
            None
        };
        for channel in &template.channels {
            let entry = MessageLogEntry {
                id: Uuid::new_v4(),
                lead_id,
                opportunity_id,
                template_id: Some(template.id),
                channel: channel.clone(),
                status: message_status::QUEUED.to_string(),
                scheduled_for,
                subject: template.subject.clone(),
                body: template.body.clone(),
                external_id: None,
                error_detail: None,
                created_at: now,
                sent_at: None,
            };
            diesel::insert_into(message_log::table)
                .values(&entry)
                .execute(conn)?;
            queued += 1;
        }
    }

    if queued > 0 {
        info!(
            "queued {queued} message(s) for lead {lead_id} on trigger {}:{}",
            trigger.kind(),
            trigger.value()
        );
    }
    Ok(queued)
}

/// Stage-entry side effect invoked after a committed transition.
pub async fn enqueue_stage_entry(
    state: &Arc<AppState>,
    outcome: &TransitionOutcome,
) -> Result<usize, EngineError> {
    let trigger = Trigger::Stage(outcome.to_stage);
    enqueue(state, trigger, outcome.lead_id, Some(outcome.opportunity_id)).await
}

pub async fn enqueue(
    state: &Arc<AppState>,
    trigger: Trigger,
    lead_id: Uuid,
    opportunity_id: Option<Uuid>,
) -> Result<usize, EngineError> {
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        enqueue_for_trigger(&mut conn, &trigger, lead_id, opportunity_id)
    })
    .await
    .map_err(|e| EngineError::Storage(format!("enqueue task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_kind_and_value() {
        let stage = Trigger::Stage(Stage::NewEnquiry);
        assert_eq!(stage.kind(), "stage");
        assert_eq!(stage.value(), "new_enquiry");

        let event = Trigger::Event("no_show".to_string());
        assert_eq!(event.kind(), "event");
        assert_eq!(event.value(), "no_show");
    }
}
