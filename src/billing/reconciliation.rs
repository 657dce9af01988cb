use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::billing::provider::PaymentEventKind;
use crate::pipeline::stages::Stage;
use crate::pipeline::transitions::{self, TransitionRequest};
use crate::shared::error::EngineError;
use crate::shared::models::{invoice_status, Invoice, Opportunity, Payment};
use crate::shared::schema::{invoices, opportunities, payments};
use crate::shared::state::AppState;

/// Entry point for verified payment-provider events. Failed payments are
/// visibility-only; unknown event types are ignored.
pub async fn process_event(
    state: &Arc<AppState>,
    kind: PaymentEventKind,
) -> Result<(), EngineError> {
    match kind {
        PaymentEventKind::Succeeded {
            external_id,
            amount,
            invoice_id,
        } => handle_payment_succeeded(state, invoice_id, amount, external_id).await,
        PaymentEventKind::Failed {
            external_id,
            reason,
        } => {
            warn!(
                "payment {external_id} failed: {}",
                reason.unwrap_or_else(|| "no reason given".to_string())
            );
            Ok(())
        }
        PaymentEventKind::Unknown(event_type) => {
            info!("ignoring payment event type {event_type}");
            Ok(())
        }
    }
}

struct RecordedPayment {
    opportunity_id: Uuid,
    duplicate: bool,
}

fn record_payment(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    amount: i64,
    external_id: &str,
) -> Result<RecordedPayment, EngineError> {
    conn.transaction::<RecordedPayment, EngineError, _>(|conn| {
        let invoice: Invoice = invoices::table
            .find(invoice_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(EngineError::NotFound("invoice", invoice_id))?;

        // Providers redeliver webhooks; the external id keys idempotence.
        let existing: Option<Payment> = payments::table
            .filter(payments::external_id.eq(external_id))
            .first(conn)
            .optional()?;
        if existing.is_some() {
            return Ok(RecordedPayment {
                opportunity_id: invoice.opportunity_id,
                duplicate: true,
            });
        }

        let payment = Payment {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            amount,
            external_id: external_id.to_string(),
            created_at: Utc::now(),
        };
        diesel::insert_into(payments::table)
            .values(&payment)
            .execute(conn)?;

        if invoice.status != invoice_status::PAID {
            diesel::update(invoices::table.find(invoice.id))
                .set((
                    invoices::status.eq(invoice_status::PAID),
                    invoices::paid_at.eq(Some(Utc::now())),
                ))
                .execute(conn)?;
        }

        Ok(RecordedPayment {
            opportunity_id: invoice.opportunity_id,
            duplicate: false,
        })
    })
}

async fn handle_payment_succeeded(
    state: &Arc<AppState>,
    invoice_id: Uuid,
    amount: i64,
    external_id: String,
) -> Result<(), EngineError> {
    let pool = state.conn.clone();
    let ext = external_id.clone();
    let recorded = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        record_payment(&mut conn, invoice_id, amount, &ext)
    })
    .await
    .map_err(|e| EngineError::Storage(format!("payment task failed: {e}")))??;

    if recorded.duplicate {
        info!("payment {external_id} already recorded, nothing to do");
        return Ok(());
    }

    let pool = state.conn.clone();
    let opportunity_id = recorded.opportunity_id;
    let stage: Stage = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let opp: Opportunity = opportunities::table
            .find(opportunity_id)
            .first(&mut conn)
            .optional()?
            .ok_or(EngineError::NotFound("opportunity", opportunity_id))?;
        Stage::from_str(&opp.stage)
    })
    .await
    .map_err(|e| EngineError::Storage(format!("stage read failed: {e}")))??;

    if !advances_on_deposit(stage) {
        info!(
            "payment {external_id} recorded; opportunity {opportunity_id} is at {stage}, \
             leaving the stage untouched"
        );
        return Ok(());
    }

    let request = TransitionRequest {
        opportunity_id,
        to_stage: Stage::DepositPaid,
        actor_id: None,
        rationale: format!("deposit cleared, payment {external_id}"),
        expected_from: Some(Stage::AwaitingDeposit),
    };
    match transitions::transition(state, request).await {
        Ok(outcome) => {
            info!(
                "opportunity {} advanced {} -> {} on payment {external_id}",
                opportunity_id, outcome.from_stage, outcome.to_stage
            );
            Ok(())
        }
        // Another producer moved the stage between our read and the
        // transition; the payment stays recorded and that is enough.
        Err(EngineError::Conflict { actual, .. }) => {
            info!(
                "payment {external_id} recorded; opportunity {opportunity_id} moved to {actual} \
                 concurrently, no automatic transition"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Only a deposit that arrives while the opportunity is actually waiting
/// for one advances the stage; anything else is recorded without moving.
pub fn advances_on_deposit(stage: Stage) -> bool {
    stage == Stage::AwaitingDeposit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_awaiting_deposit_advances() {
        assert!(advances_on_deposit(Stage::AwaitingDeposit));
        for stage in Stage::ALL {
            if stage != Stage::AwaitingDeposit {
                assert!(!advances_on_deposit(stage), "{stage} should not advance");
            }
        }
    }
}
