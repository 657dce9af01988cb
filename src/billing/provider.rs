use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::shared::error::EngineError;

/// Signed webhook events older than this are rejected outright.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentEventData,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum PaymentEventKind {
    Succeeded {
        external_id: String,
        amount: i64,
        invoice_id: Uuid,
    },
    Failed {
        external_id: String,
        reason: Option<String>,
    },
    Unknown(String),
}

pub struct PaymentClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    webhook_secret: String,
    success_url: String,
    cancel_url: String,
}

impl PaymentClient {
    pub fn new(cfg: &PaymentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: cfg.base_url.clone(),
            api_key: cfg.api_key.clone(),
            webhook_secret: cfg.webhook_secret.clone(),
            success_url: cfg.success_url.clone(),
            cancel_url: cfg.cancel_url.clone(),
        }
    }

    pub async fn create_checkout_session(
        &self,
        amount_pence: i64,
        metadata: HashMap<String, String>,
    ) -> Result<CheckoutSession, EngineError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("currency".to_string(), "gbp".to_string()),
            ("amount".to_string(), amount_pence.to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];
        for (key, value) in metadata {
            form.push((format!("metadata[{key}]"), value));
        }

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&form)
            .send()
            .await
            .map_err(|e| EngineError::External(format!("checkout request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::External(format!("checkout response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(EngineError::External(format!(
                "checkout returned HTTP {status}: {body}"
            )));
        }

        #[derive(Deserialize)]
        struct SessionReply {
            id: String,
            url: Option<String>,
        }
        let reply: SessionReply = serde_json::from_str(&body)
            .map_err(|e| EngineError::External(format!("checkout reply not JSON: {e}")))?;
        Ok(CheckoutSession {
            session_id: reply.id,
            url: reply.url,
        })
    }

    /// Verifies the `t=<ts>,v1=<hex hmac>` signature header over
    /// `<ts>.<payload>` and parses the event. Rejects stale timestamps.
    pub fn verify_webhook_signature(
        &self,
        payload: &str,
        signature: &str,
    ) -> Result<PaymentEvent, EngineError> {
        let parts: HashMap<&str, &str> = signature
            .split(',')
            .filter_map(|part| {
                let mut split = part.trim().splitn(2, '=');
                Some((split.next()?, split.next()?))
            })
            .collect();

        let timestamp = parts.get("t").ok_or(EngineError::Unauthorized)?;
        let received_sig = parts.get("v1").ok_or(EngineError::Unauthorized)?;

        let expected_sig = compute_signature(&self.webhook_secret, payload, timestamp);
        if expected_sig != *received_sig {
            return Err(EngineError::Unauthorized);
        }

        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| EngineError::Unauthorized)?;
        let now = chrono::Utc::now().timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(EngineError::Unauthorized);
        }

        serde_json::from_str(payload)
            .map_err(|e| EngineError::Validation(format!("malformed payment event: {e}")))
    }

    /// Mirrors the provider's signing scheme; used by the tests and by
    /// local webhook replay tooling.
    pub fn sign_payload(&self, payload: &str, timestamp: i64) -> String {
        let sig = compute_signature(&self.webhook_secret, payload, &timestamp.to_string());
        format!("t={timestamp},v1={sig}")
    }
}

fn compute_signature(secret: &str, payload: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{timestamp}.{payload}");
    // HMAC-SHA256 accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn parse_event(event: &PaymentEvent) -> Result<PaymentEventKind, EngineError> {
    let object = &event.data.object;
    let external_id = object
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or(&event.id)
        .to_string();

    match event.event_type.as_str() {
        "payment.succeeded" => {
            let amount = object
                .get("amount")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| {
                    EngineError::Validation("payment event is missing an amount".to_string())
                })?;
            let invoice_id = object
                .pointer("/metadata/invoice_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| {
                    EngineError::Validation(
                        "payment event is missing an invoice reference".to_string(),
                    )
                })?;
            Ok(PaymentEventKind::Succeeded {
                external_id,
                amount,
                invoice_id,
            })
        }
        "payment.failed" => Ok(PaymentEventKind::Failed {
            external_id,
            reason: object
                .get("failure_reason")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }),
        other => Ok(PaymentEventKind::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(secret: &str) -> PaymentClient {
        PaymentClient::new(&PaymentConfig {
            base_url: "http://localhost:9050".to_string(),
            api_key: "sk_test".to_string(),
            webhook_secret: secret.to_string(),
            success_url: "http://localhost/done".to_string(),
            cancel_url: "http://localhost/cancelled".to_string(),
            deposit_fraction: 0.25,
        })
    }

    fn succeeded_payload(invoice_id: Uuid) -> String {
        serde_json::json!({
            "id": "evt_1",
            "type": "payment.succeeded",
            "created": chrono::Utc::now().timestamp(),
            "data": { "object": {
                "id": "pay_123",
                "amount": 50000,
                "metadata": { "invoice_id": invoice_id.to_string() }
            }}
        })
        .to_string()
    }

    #[test]
    fn valid_signature_verifies_and_parses() {
        let client = client("whsec_test");
        let invoice_id = Uuid::new_v4();
        let payload = succeeded_payload(invoice_id);
        let signature = client.sign_payload(&payload, chrono::Utc::now().timestamp());

        let event = client.verify_webhook_signature(&payload, &signature).unwrap();
        match parse_event(&event).unwrap() {
            PaymentEventKind::Succeeded {
                external_id,
                amount,
                invoice_id: parsed,
            } => {
                assert_eq!(external_id, "pay_123");
                assert_eq!(amount, 50000);
                assert_eq!(parsed, invoice_id);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let client = client("whsec_test");
        let payload = succeeded_payload(Uuid::new_v4());
        let signature = client.sign_payload(&payload, chrono::Utc::now().timestamp());
        let tampered = payload.replace("50000", "1");
        let err = client.verify_webhook_signature(&tampered, &signature).unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let client = client("whsec_test");
        let payload = succeeded_payload(Uuid::new_v4());
        let old = chrono::Utc::now().timestamp() - 3600;
        let signature = client.sign_payload(&payload, old);
        let err = client.verify_webhook_signature(&payload, &signature).unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signer = client("whsec_other");
        let receiver = client("whsec_test");
        let payload = succeeded_payload(Uuid::new_v4());
        let signature = signer.sign_payload(&payload, chrono::Utc::now().timestamp());
        assert!(receiver.verify_webhook_signature(&payload, &signature).is_err());
    }

    #[test]
    fn missing_invoice_reference_fails_validation() {
        let event = PaymentEvent {
            id: "evt_2".to_string(),
            event_type: "payment.succeeded".to_string(),
            data: PaymentEventData {
                object: serde_json::json!({ "id": "pay_9", "amount": 100 }),
            },
            created: 0,
        };
        assert_eq!(parse_event(&event).unwrap_err().kind(), "validation");
    }

    #[test]
    fn unrecognized_events_pass_through() {
        let event = PaymentEvent {
            id: "evt_3".to_string(),
            event_type: "refund.created".to_string(),
            data: PaymentEventData {
                object: serde_json::json!({}),
            },
            created: 0,
        };
        assert!(matches!(
            parse_event(&event).unwrap(),
            PaymentEventKind::Unknown(_)
        ));
    }
}
