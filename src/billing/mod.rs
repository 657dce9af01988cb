pub mod provider;
pub mod reconciliation;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::auth;
use crate::shared::error::EngineError;
use crate::shared::models::{invoice_status, Invoice, Opportunity};
use crate::shared::schema::{invoices, opportunities};
use crate::shared::state::AppState;

pub use provider::{CheckoutSession, PaymentClient, PaymentEventKind};

/// Inbound payment webhook. The signature is checked before the payload
/// is even parsed; an unsigned or stale event never reaches the engine.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, EngineError> {
    let signature = headers
        .get("x-payment-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(EngineError::Unauthorized)?;

    let event = state.payments.verify_webhook_signature(&body, signature)?;
    let kind = provider::parse_event(&event)?;
    reconciliation::process_event(&state, kind).await?;
    Ok(StatusCode::OK)
}

/// Creates (or reuses) the deposit invoice for an opportunity and asks
/// the payment provider for a checkout link.
pub async fn issue_deposit_link(
    state: &Arc<AppState>,
    opportunity_id: Uuid,
) -> Result<CheckoutSession, EngineError> {
    let pool = state.conn.clone();
    let fraction = state.config.payments.deposit_fraction;
    let invoice = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        find_or_create_deposit_invoice(&mut conn, opportunity_id, fraction)
    })
    .await
    .map_err(|e| EngineError::Storage(format!("invoice task failed: {e}")))??;

    let mut metadata = HashMap::new();
    metadata.insert("invoice_id".to_string(), invoice.id.to_string());
    metadata.insert("opportunity_id".to_string(), opportunity_id.to_string());

    let session = state
        .payments
        .create_checkout_session(invoice.deposit_amount, metadata)
        .await?;

    let pool = state.conn.clone();
    let invoice_id = invoice.id;
    let session_id = session.session_id.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        diesel::update(invoices::table.find(invoice_id))
            .set(invoices::checkout_session_id.eq(Some(session_id)))
            .execute(&mut conn)?;
        Ok::<(), EngineError>(())
    })
    .await
    .map_err(|e| EngineError::Storage(format!("invoice update failed: {e}")))??;

    info!(
        "deposit checkout session {} issued for opportunity {opportunity_id}",
        session.session_id
    );
    Ok(session)
}

fn find_or_create_deposit_invoice(
    conn: &mut PgConnection,
    opportunity_id: Uuid,
    deposit_fraction: f64,
) -> Result<Invoice, EngineError> {
    let existing: Option<Invoice> = invoices::table
        .filter(invoices::opportunity_id.eq(opportunity_id))
        .filter(invoices::status.eq(invoice_status::PENDING))
        .first(conn)
        .optional()?;
    if let Some(invoice) = existing {
        return Ok(invoice);
    }

    let opp: Opportunity = opportunities::table
        .find(opportunity_id)
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound("opportunity", opportunity_id))?;
    let amount = opp.value_estimate.ok_or_else(|| {
        EngineError::Validation("opportunity has no value estimate to invoice against".to_string())
    })?;

    let invoice = Invoice {
        id: Uuid::new_v4(),
        opportunity_id,
        amount,
        deposit_amount: deposit_amount(amount, deposit_fraction),
        status: invoice_status::PENDING.to_string(),
        checkout_session_id: None,
        created_at: Utc::now(),
        paid_at: None,
    };
    diesel::insert_into(invoices::table)
        .values(&invoice)
        .execute(conn)?;
    Ok(invoice)
}

pub fn deposit_amount(total: i64, fraction: f64) -> i64 {
    ((total as f64) * fraction).round() as i64
}

pub async fn deposit_link_handler(
    State(state): State<Arc<AppState>>,
    Path(opportunity_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<CheckoutSession>, EngineError> {
    auth::require_user(&state, &headers).await?;
    let session = issue_deposit_link(&state, opportunity_id).await?;
    Ok(Json(session))
}

pub fn configure_billing_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/webhooks/payment", post(payment_webhook))
        .route(
            "/api/opportunities/{id}/deposit-link",
            post(deposit_link_handler),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_amount_rounds_to_nearest_penny() {
        assert_eq!(deposit_amount(100_000, 0.25), 25_000);
        assert_eq!(deposit_amount(99_999, 0.25), 25_000);
        assert_eq!(deposit_amount(10, 0.25), 3);
        assert_eq!(deposit_amount(0, 0.25), 0);
    }
}
