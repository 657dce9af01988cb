use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::{error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::calendar::BusyInterval;
use crate::meetings::suggestions;
use crate::messaging::dispatcher::SweepReport;
use crate::messaging::scheduler::{self, Trigger};
use crate::shared::error::EngineError;
use crate::shared::models::{booking_outcome, task_status, tracking_status, Booking, Opportunity, Task};
use crate::shared::schema::{bookings, opportunities, tasks};
use crate::shared::state::AppState;

pub const NO_SHOW_EVENT: &str = "no_show";

/// Attendance heuristic: a busy interval overlapping the slot, or call
/// notes on file, count as attended. No signal at all is a no-show.
pub fn determine_outcome(
    busy: &[BusyInterval],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    has_notes: bool,
) -> &'static str {
    if has_notes || busy.iter().any(|interval| interval.overlaps(start, end)) {
        booking_outcome::ATTENDED
    } else {
        booking_outcome::NO_SHOW
    }
}

fn booking_has_notes(booking: &Booking) -> bool {
    booking
        .notes
        .as_deref()
        .map(|n| !n.trim().is_empty())
        .unwrap_or(false)
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

fn due_booking_ids(conn: &mut PgConnection) -> Result<Vec<Uuid>, EngineError> {
    let now = Utc::now();
    let ids = bookings::table
        .filter(bookings::scheduled_at.lt(now))
        .filter(bookings::outcome.eq(booking_outcome::PENDING))
        .filter(bookings::tracking_status.eq(tracking_status::PENDING))
        .order(bookings::scheduled_at.asc())
        .select(bookings::id)
        .load::<Uuid>(conn)?;
    Ok(ids)
}

/// Claims a booking for this sweep run. Bookings already advanced past
/// `pending` stay claimed by whoever got there first.
fn claim_booking(conn: &mut PgConnection, booking_id: Uuid) -> Result<bool, EngineError> {
    let claimed = diesel::update(
        bookings::table
            .filter(bookings::id.eq(booking_id))
            .filter(bookings::tracking_status.eq(tracking_status::PENDING)),
    )
    .set((
        bookings::tracking_status.eq(tracking_status::PROCESSING),
        bookings::updated_at.eq(Utc::now()),
    ))
    .execute(conn)?;
    Ok(claimed == 1)
}

fn release_booking(conn: &mut PgConnection, booking_id: Uuid) -> Result<(), EngineError> {
    diesel::update(bookings::table.find(booking_id))
        .set((
            bookings::tracking_status.eq(tracking_status::PENDING),
            bookings::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

fn finish_booking(
    conn: &mut PgConnection,
    booking_id: Uuid,
    outcome: &str,
) -> Result<(), EngineError> {
    diesel::update(bookings::table.find(booking_id))
        .set((
            bookings::outcome.eq(outcome.to_string()),
            bookings::tracking_status.eq(tracking_status::PROCESSED),
            bookings::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

fn load_booking(
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

/// Detects meetings whose time has passed and settles their outcome.
/// Claim-before-process keeps overlapping sweep runs off each other's
/// bookings; a calendar failure releases the claim for the next run.
pub async fn run_meeting_sweep(state: &Arc<AppState>) -> Result<SweepReport, EngineError> {
    let ids = with_conn(state, due_booking_ids).await?;
    let mut report = SweepReport::default();

    for booking_id in ids {
        let claimed = match with_conn(state, move |conn| claim_booking(conn, booking_id)).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!("claim failed for booking {booking_id}: {e}");
                continue;
            }
        };
        if !claimed {
            continue;
        }
        report.processed += 1;

        match track_one(state, booking_id).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                report.failed += 1;
                warn!("meeting tracking failed for booking {booking_id}: {e}");
                if let Err(release_err) =
                    with_conn(state, move |conn| release_booking(conn, booking_id)).await
                {
                    error!("could not release booking {booking_id}: {release_err}");
                }
            }
        }
    }

    info!(
        "meeting sweep processed={} settled={} failed={}",
        report.processed, report.sent, report.failed
    );
    Ok(report)
}

async fn track_one(state: &Arc<AppState>, booking_id: Uuid) -> Result<(), EngineError> {
    let (booking, opportunity) =
        with_conn(state, move |conn| load_booking(conn, booking_id)).await?;

    let slot_start = booking.scheduled_at;
    let slot_end = slot_start + Duration::minutes(i64::from(booking.duration_minutes.max(15)));
    let has_notes = booking_has_notes(&booking);

    let busy = match state.calendar.query_free_busy(slot_start, slot_end).await {
        Ok(busy) => busy,
        // Notes are evidence enough on their own; without them the claim
        // goes back so a later sweep can retry once the calendar recovers.
        Err(e) if has_notes => {
            warn!("free-busy lookup failed for booking {booking_id}, using notes: {e}");
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let outcome = determine_outcome(&busy, slot_start, slot_end, has_notes);
    with_conn(state, move |conn| finish_booking(conn, booking_id, outcome)).await?;
    info!("booking {booking_id} settled as {outcome}");

    if outcome == booking_outcome::ATTENDED {
        if let Some(notes) = booking.notes.clone().filter(|n| !n.trim().is_empty()) {
            // The outcome above is already committed; a classification
            // failure only costs the suggestion, never the tracking.
            if let Err(e) = suggestions::process_post_call_notes(state, booking_id, notes).await {
                warn!("post-call classification failed for booking {booking_id}: {e}");
            }
        }
    } else {
        handle_no_show(state, &booking, &opportunity).await;
    }

    Ok(())
}

async fn handle_no_show(state: &Arc<AppState>, booking: &Booking, opportunity: &Opportunity) {
    if let Err(e) = scheduler::enqueue(
        state,
        Trigger::Event(NO_SHOW_EVENT.to_string()),
        opportunity.lead_id,
        Some(opportunity.id),
    )
    .await
    {
        warn!(
            "no-show messages not queued for booking {}: {e}",
            booking.id
        );
    }

    let pool = state.conn.clone();
    let opportunity_id = opportunity.id;
    let owner_id = opportunity.owner_id;
    let rebook = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            opportunity_id,
            task_type: "rebook_call".to_string(),
            title: "Rebook the missed call".to_string(),
            status: task_status::OPEN.to_string(),
            due_at: Some(now + Duration::days(1)),
            owner_id,
            created_at: now,
            completed_at: None,
        };
        diesel::insert_into(tasks::table)
            .values(&task)
            .execute(&mut conn)?;
        Ok::<(), EngineError>(())
    })
    .await;
    match rebook {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("rebook task not created for booking {}: {e}", booking.id),
        Err(e) => warn!("rebook task not created for booking {}: {e}", booking.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, min, 0).unwrap()
    }

    #[test]
    fn busy_overlap_counts_as_attended() {
        let busy = vec![BusyInterval { start: t(10, 0), end: t(10, 30) }];
        assert_eq!(
            determine_outcome(&busy, t(10, 0), t(10, 45), false),
            booking_outcome::ATTENDED
        );
    }

    #[test]
    fn notes_count_as_attended_even_without_calendar_signal() {
        assert_eq!(
            determine_outcome(&[], t(10, 0), t(10, 45), true),
            booking_outcome::ATTENDED
        );
    }

    #[test]
    fn no_signal_is_a_no_show() {
        let busy = vec![BusyInterval { start: t(12, 0), end: t(13, 0) }];
        assert_eq!(
            determine_outcome(&busy, t(10, 0), t(10, 45), false),
            booking_outcome::NO_SHOW
        );
        assert_eq!(
            determine_outcome(&[], t(10, 0), t(10, 45), false),
            booking_outcome::NO_SHOW
        );
    }
}
