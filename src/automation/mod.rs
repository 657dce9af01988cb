use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use cron::Schedule;
use log::{error, info};
use std::str::FromStr;
use std::sync::Arc;

use crate::meetings::tracker;
use crate::messaging::dispatcher::{self, SweepReport};
use crate::shared::auth;
use crate::shared::error::EngineError;
use crate::shared::state::AppState;

const FALLBACK_CRON: &str = "0 * * * * *";

/// Background runner for the two sweeps. The sweeps themselves are
/// claim-based, so an overlapping run (in-process tick plus an external
/// cron hitting the HTTP endpoint) settles each row at most once.
pub struct SweepService {
    state: Arc<AppState>,
}

impl SweepService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    fn parse_schedule(expression: &str, name: &str) -> Schedule {
        Schedule::from_str(expression).unwrap_or_else(|e| {
            error!("invalid {name} cron expression {expression:?} ({e}), using every minute");
            Schedule::from_str(FALLBACK_CRON).expect("fallback cron expression parses")
        })
    }

    pub fn spawn(&self) {
        let state = self.state.clone();
        let message_schedule =
            Self::parse_schedule(&state.config.sweeps.message_cron, "message sweep");
        let meeting_schedule =
            Self::parse_schedule(&state.config.sweeps.meeting_cron, "meeting sweep");

        tokio::spawn(async move {
            let mut next_messages = upcoming(&message_schedule);
            let mut next_meetings = upcoming(&meeting_schedule);
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(15));
            info!("sweep service started");

            loop {
                interval.tick().await;
                let now = Utc::now();

                if due(&next_messages, now) {
                    if let Err(e) = dispatcher::run_dispatch_sweep(&state).await {
                        error!("message sweep failed: {e}");
                    }
                    next_messages = upcoming(&message_schedule);
                }
                if due(&next_meetings, now) {
                    if let Err(e) = tracker::run_meeting_sweep(&state).await {
                        error!("meeting sweep failed: {e}");
                    }
                    next_meetings = upcoming(&meeting_schedule);
                }
            }
        });
    }
}

fn upcoming(schedule: &Schedule) -> Option<DateTime<Utc>> {
    schedule.upcoming(Utc).next()
}

fn due(next: &Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    next.map(|at| at <= now).unwrap_or(false)
}

/// HTTP face of the sweeps, for external cron or manual admin runs.
pub async fn message_sweep_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, EngineError> {
    auth::verify_sweep_auth(&state, &headers).await?;
    let report = dispatcher::run_dispatch_sweep(&state).await?;
    Ok(Json(report))
}

pub async fn meeting_sweep_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, EngineError> {
    auth::verify_sweep_auth(&state, &headers).await?;
    let report = tracker::run_meeting_sweep(&state).await?;
    Ok(Json(report))
}

pub fn configure_sweep_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sweeps/messages", post(message_sweep_handler))
        .route("/api/sweeps/meetings", post(meeting_sweep_handler))
}
