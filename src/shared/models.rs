use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::schema::{
    bookings, invoices, leads, message_log, message_templates, opportunities, payments,
    post_call_actions, stage_log, tasks, users,
};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub service_regions: Vec<String>,
    pub active_opportunities: i32,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub api_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = leads)]
pub struct Lead {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub postcode: String,
    pub project_type: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub opted_out: bool,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = opportunities)]
pub struct Opportunity {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub stage: String,
    pub owner_id: Option<Uuid>,
    pub value_estimate: Option<i64>,
    pub deposit_paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = stage_log)]
pub struct StageLogEntry {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub from_stage: Option<String>,
    pub to_stage: String,
    pub actor_id: Option<Uuid>,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = tasks)]
pub struct Task {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub task_type: String,
    pub title: String,
    pub status: String,
    pub due_at: Option<DateTime<Utc>>,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = bookings)]
pub struct Booking {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub booking_type: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub outcome: String,
    pub tracking_status: String,
    pub calendar_event_id: Option<String>,
    pub notes: Option<String>,
    pub ai_suggestion: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = post_call_actions)]
pub struct PostCallAction {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub opportunity_id: Uuid,
    pub action_type: String,
    pub suggested_stage: Option<String>,
    pub actual_stage: Option<String>,
    pub confidence: Option<f64>,
    pub rationale: String,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = message_templates)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub name: String,
    pub trigger_kind: String,
    pub trigger_value: String,
    pub channels: Vec<String>,
    pub delay_minutes: i32,
    pub subject: Option<String>,
    pub body: String,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = message_log)]
pub struct MessageLogEntry {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub opportunity_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub channel: String,
    pub status: String,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub body: String,
    pub external_id: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = invoices)]
pub struct Invoice {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub amount: i64,
    pub deposit_amount: i64,
    pub status: String,
    pub checkout_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = payments)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: i64,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
}

pub mod message_status {
    pub const QUEUED: &str = "queued";
    pub const SENDING: &str = "sending";
    pub const SENT: &str = "sent";
    pub const FAILED: &str = "failed";
}

pub mod booking_outcome {
    pub const PENDING: &str = "pending";
    pub const ATTENDED: &str = "attended";
    pub const NO_SHOW: &str = "no_show";
    pub const CANCELLED: &str = "cancelled";
}

pub mod tracking_status {
    pub const PENDING: &str = "pending";
    pub const PROCESSING: &str = "processing";
    pub const PROCESSED: &str = "processed";
}

pub mod task_status {
    pub const OPEN: &str = "open";
    pub const DONE: &str = "done";
    pub const CANCELLED: &str = "cancelled";
}

pub mod invoice_status {
    pub const PENDING: &str = "pending";
    pub const PAID: &str = "paid";
    pub const VOID: &str = "void";
}
