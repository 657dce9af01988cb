use chrono::Utc;
use diesel::prelude::*;
use log::{error, info, warn};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::messaging::channels::Channel;
use crate::messaging::templates;
use crate::shared::error::EngineError;
use crate::shared::models::{message_status, Lead, MessageLogEntry, Opportunity};
use crate::shared::schema::{leads, message_log, opportunities};
use crate::shared::state::AppState;

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Why an entry was terminally failed without attempting a send.
#[derive(Debug, PartialEq, Eq)]
pub enum SkipReason {
    OptedOut,
    MissingEmail,
    MissingPhone,
}

impl SkipReason {
    pub fn detail(&self) -> &'static str {
        match self {
            Self::OptedOut => "lead has opted out",
            Self::MissingEmail => "lead has no email address",
            Self::MissingPhone => "lead has no phone number",
        }
    }
}

/// Contact resolution happens at send time against the fresh lead row.
/// Opt-out always wins, before any channel check.
pub fn resolve_recipient(channel: Channel, lead: &Lead) -> Result<String, SkipReason> {
    if lead.opted_out {
        return Err(SkipReason::OptedOut);
    }
    match channel {
        Channel::Email => lead
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or(SkipReason::MissingEmail),
        Channel::Sms | Channel::Whatsapp => lead
            .phone
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or(SkipReason::MissingPhone),
    }
}

fn due_entry_ids(conn: &mut PgConnection) -> Result<Vec<Uuid>, EngineError> {
    let now = Utc::now();
    let ids = message_log::table
        .filter(message_log::status.eq(message_status::QUEUED))
        .filter(
            message_log::scheduled_for
                .is_null()
                .or(message_log::scheduled_for.le(now)),
        )
        .order(message_log::created_at.asc())
        .select(message_log::id)
        .load::<Uuid>(conn)?;
    Ok(ids)
}

/// Claims one entry by flipping `queued` to `sending`. Zero rows affected
/// means another sweep instance already owns it; the entry is skipped
/// without touching it again.
fn claim_entry(conn: &mut PgConnection, entry_id: Uuid) -> Result<bool, EngineError> {
    let claimed = diesel::update(
        message_log::table
            .filter(message_log::id.eq(entry_id))
            .filter(message_log::status.eq(message_status::QUEUED)),
    )
    .set(message_log::status.eq(message_status::SENDING))
    .execute(conn)?;
    Ok(claimed == 1)
}

fn load_context(
    conn: &mut PgConnection,
    entry_id: Uuid,
) -> Result<(MessageLogEntry, Lead, Option<Opportunity>), EngineError> {
    let entry: MessageLogEntry = message_log::table
        .find(entry_id)
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound("message", entry_id))?;
    let lead: Lead = leads::table
        .find(entry.lead_id)
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound("lead", entry.lead_id))?;
    let opportunity = match entry.opportunity_id {
        Some(opp_id) => opportunities::table.find(opp_id).first(conn).optional()?,
        None => None,
    };
    Ok((entry, lead, opportunity))
}

fn mark_sent(
    conn: &mut PgConnection,
    entry_id: Uuid,
    external_id: Option<String>,
) -> Result<(), EngineError> {
    diesel::update(message_log::table.find(entry_id))
        .set((
            message_log::status.eq(message_status::SENT),
            message_log::external_id.eq(external_id),
            message_log::sent_at.eq(Some(Utc::now())),
        ))
        .execute(conn)?;
    Ok(())
}

fn mark_failed(
    conn: &mut PgConnection,
    entry_id: Uuid,
    detail: &str,
) -> Result<(), EngineError> {
    diesel::update(message_log::table.find(entry_id))
        .set((
            message_log::status.eq(message_status::FAILED),
            message_log::error_detail.eq(Some(detail.to_string())),
        ))
        .execute(conn)?;
    Ok(())
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

/// The queue-processing sweep. One bad entry never blocks the batch: each
/// failure is recorded on its own row and the sweep moves on. Safe to run
/// concurrently with itself thanks to the claim step.
pub async fn run_dispatch_sweep(state: &Arc<AppState>) -> Result<SweepReport, EngineError> {
    let ids = with_conn(state, due_entry_ids).await?;
    let mut report = SweepReport::default();

    for entry_id in ids {
        let claimed = match with_conn(state, move |conn| claim_entry(conn, entry_id)).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!("claim failed for message {entry_id}: {e}");
                continue;
            }
        };
        if !claimed {
            continue;
        }
        report.processed += 1;

        match dispatch_one(state, entry_id).await {
            Ok(DispatchResult::Sent) => report.sent += 1,
            Ok(DispatchResult::Skipped) => report.skipped += 1,
            Ok(DispatchResult::Failed) => report.failed += 1,
            Err(e) => {
                report.failed += 1;
                error!("dispatch failed for message {entry_id}: {e}");
                let detail = e.to_string();
                if let Err(mark_err) =
                    with_conn(state, move |conn| mark_failed(conn, entry_id, &detail)).await
                {
                    error!("could not record failure for message {entry_id}: {mark_err}");
                }
            }
        }
    }

    info!(
        "message sweep processed={} sent={} failed={} skipped={}",
        report.processed, report.sent, report.failed, report.skipped
    );
    Ok(report)
}

enum DispatchResult {
    Sent,
    Skipped,
    Failed,
}

async fn dispatch_one(
    state: &Arc<AppState>,
    entry_id: Uuid,
) -> Result<DispatchResult, EngineError> {
    let (entry, lead, opportunity) =
        with_conn(state, move |conn| load_context(conn, entry_id)).await?;

    let channel = match Channel::from_str(&entry.channel) {
        Ok(channel) => channel,
        Err(e) => {
            let detail = e.to_string();
            with_conn(state, move |conn| mark_failed(conn, entry_id, &detail)).await?;
            return Ok(DispatchResult::Failed);
        }
    };

    let recipient = match resolve_recipient(channel, &lead) {
        Ok(recipient) => recipient,
        Err(reason) => {
            with_conn(state, move |conn| {
                mark_failed(conn, entry_id, reason.detail())
            })
            .await?;
            return Ok(DispatchResult::Skipped);
        }
    };

    let vars = templates::build_vars(&lead, opportunity.as_ref());
    let body = templates::render(&entry.body, &vars);
    let subject = entry.subject.as_deref().map(|s| templates::render(s, &vars));

    let sender = match state.senders.get(channel) {
        Ok(sender) => sender,
        Err(e) => {
            let detail = e.to_string();
            with_conn(state, move |conn| mark_failed(conn, entry_id, &detail)).await?;
            return Ok(DispatchResult::Failed);
        }
    };

    match sender.send(&recipient, subject.as_deref(), &body).await {
        Ok(outcome) => {
            with_conn(state, move |conn| {
                mark_sent(conn, entry_id, outcome.external_id.clone())
            })
            .await?;
            Ok(DispatchResult::Sent)
        }
        Err(e) => {
            warn!("send failed for message {entry_id}: {e}");
            let detail = e.to_string();
            with_conn(state, move |conn| mark_failed(conn, entry_id, &detail)).await?;
            Ok(DispatchResult::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn lead(email: Option<&str>, phone: Option<&str>, opted_out: bool) -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            first_name: "Ana".to_string(),
            last_name: "Briggs".to_string(),
            email: email.map(|e| e.to_string()),
            phone: phone.map(|p| p.to_string()),
            postcode: "WA1 1AA".to_string(),
            project_type: None,
            source: None,
            notes: None,
            opted_out,
            owner_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn opted_out_lead_is_never_contacted() {
        let lead = lead(Some("ana@example.com"), Some("0700000000"), true);
        assert_eq!(
            resolve_recipient(Channel::Email, &lead),
            Err(SkipReason::OptedOut)
        );
        assert_eq!(
            resolve_recipient(Channel::Sms, &lead),
            Err(SkipReason::OptedOut)
        );
    }

    #[test]
    fn email_requires_an_address() {
        let lead = lead(None, Some("0700000000"), false);
        assert_eq!(
            resolve_recipient(Channel::Email, &lead),
            Err(SkipReason::MissingEmail)
        );
    }

    #[test]
    fn text_channels_require_a_phone() {
        let lead = lead(Some("ana@example.com"), None, false);
        assert_eq!(
            resolve_recipient(Channel::Sms, &lead),
            Err(SkipReason::MissingPhone)
        );
        assert_eq!(
            resolve_recipient(Channel::Whatsapp, &lead),
            Err(SkipReason::MissingPhone)
        );
    }

    #[test]
    fn resolves_the_matching_contact_field() {
        let lead = lead(Some("ana@example.com"), Some("0700000000"), false);
        assert_eq!(
            resolve_recipient(Channel::Email, &lead).unwrap(),
            "ana@example.com"
        );
        assert_eq!(
            resolve_recipient(Channel::Whatsapp, &lead).unwrap(),
            "0700000000"
        );
    }

    #[test]
    fn empty_strings_count_as_missing() {
        let lead = lead(Some(""), Some(""), false);
        assert_eq!(
            resolve_recipient(Channel::Email, &lead),
            Err(SkipReason::MissingEmail)
        );
        assert_eq!(
            resolve_recipient(Channel::Sms, &lead),
            Err(SkipReason::MissingPhone)
        );
    }
}
