use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::CalendarConfig;
use crate::shared::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEventDraft {
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendee_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && self.end > start
    }
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn create_event(&self, draft: &CalendarEventDraft) -> Result<String, EngineError>;
    async fn update_event(
        &self,
        event_id: &str,
        draft: &CalendarEventDraft,
    ) -> Result<(), EngineError>;
    async fn delete_event(&self, event_id: &str) -> Result<(), EngineError>;
    async fn query_free_busy(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, EngineError>;
}

pub struct HttpCalendarClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    calendar_id: String,
}

impl HttpCalendarClient {
    pub fn new(cfg: &CalendarConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: cfg.base_url.clone(),
            api_token: cfg.api_token.clone(),
            calendar_id: cfg.calendar_id.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/calendars/{}{}", self.base_url, self.calendar_id, path)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FreeBusyReply {
    busy: Vec<BusyInterval>,
}

#[async_trait]
impl CalendarProvider for HttpCalendarClient {
    async fn create_event(&self, draft: &CalendarEventDraft) -> Result<String, EngineError> {
        let response = self
            .client
            .post(self.url("/events"))
            .bearer_auth(&self.api_token)
            .json(draft)
            .send()
            .await
            .map_err(|e| EngineError::External(format!("calendar create failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::External(format!(
                "calendar create returned HTTP {}",
                response.status()
            )));
        }
        let created: CreatedEvent = response
            .json()
            .await
            .map_err(|e| EngineError::External(format!("calendar reply unreadable: {e}")))?;
        Ok(created.id)
    }

    async fn update_event(
        &self,
        event_id: &str,
        draft: &CalendarEventDraft,
    ) -> Result<(), EngineError> {
        let response = self
            .client
            .put(self.url(&format!("/events/{event_id}")))
            .bearer_auth(&self.api_token)
            .json(draft)
            .send()
            .await
            .map_err(|e| EngineError::External(format!("calendar update failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::External(format!(
                "calendar update returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .delete(self.url(&format!("/events/{event_id}")))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| EngineError::External(format!("calendar delete failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::External(format!(
                "calendar delete returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn query_free_busy(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, EngineError> {
        let response = self
            .client
            .post(self.url("/freeBusy"))
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "timeMin": time_min, "timeMax": time_max }))
            .send()
            .await
            .map_err(|e| EngineError::External(format!("free-busy query failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::External(format!(
                "free-busy query returned HTTP {}",
                response.status()
            )));
        }
        let reply: FreeBusyReply = response
            .json()
            .await
            .map_err(|e| EngineError::External(format!("free-busy reply unreadable: {e}")))?;
        Ok(reply.busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, min, 0).unwrap()
    }

    #[test]
    fn interval_overlap() {
        let busy = BusyInterval { start: t(10, 0), end: t(11, 0) };
        assert!(busy.overlaps(t(10, 30), t(11, 30)));
        assert!(busy.overlaps(t(9, 0), t(12, 0)));
        assert!(!busy.overlaps(t(11, 0), t(12, 0)));
        assert!(!busy.overlaps(t(8, 0), t(10, 0)));
    }
}
