#[cfg(test)]
mod payment_provider_integration_tests {
    use crmserver::billing::provider::{parse_event, PaymentClient, PaymentEventKind};
    use crmserver::config::PaymentConfig;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn payment_config(base_url: &str, secret: &str) -> PaymentConfig {
        PaymentConfig {
            base_url: base_url.to_string(),
            api_key: "sk_test_123".to_string(),
            webhook_secret: secret.to_string(),
            success_url: "http://localhost:8080/pay/done".to_string(),
            cancel_url: "http://localhost:8080/pay/cancelled".to_string(),
            deposit_fraction: 0.25,
        }
    }

    #[tokio::test]
    async fn checkout_session_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/checkout/sessions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id": "cs_test_42", "url": "https://pay.example.com/cs_test_42"}"#,
            )
            .create_async()
            .await;

        let client = PaymentClient::new(&payment_config(&server.url(), "whsec_test"));
        let mut metadata = HashMap::new();
        metadata.insert("invoice_id".to_string(), Uuid::new_v4().to_string());

        let session = client
            .create_checkout_session(25_000, metadata)
            .await
            .expect("checkout session should be created");

        assert_eq!(session.session_id, "cs_test_42");
        assert_eq!(
            session.url.as_deref(),
            Some("https://pay.example.com/cs_test_42")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn checkout_failure_surfaces_the_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/checkout/sessions")
            .with_status(402)
            .with_body(r#"{"error": {"message": "card declined"}}"#)
            .create_async()
            .await;

        let client = PaymentClient::new(&payment_config(&server.url(), "whsec_test"));
        let err = client
            .create_checkout_session(25_000, HashMap::new())
            .await
            .expect_err("a 402 must not look like success");
        assert_eq!(err.kind(), "external_failure");
    }

    #[tokio::test]
    async fn signed_webhook_event_parses_end_to_end() {
        let client = PaymentClient::new(&payment_config("http://localhost:1", "whsec_test"));
        let invoice_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "id": "evt_99",
            "type": "payment.succeeded",
            "created": chrono::Utc::now().timestamp(),
            "data": { "object": {
                "id": "pay_abc",
                "amount": 12_500,
                "metadata": { "invoice_id": invoice_id.to_string() }
            }}
        })
        .to_string();

        let signature = client.sign_payload(&payload, chrono::Utc::now().timestamp());
        let event = client
            .verify_webhook_signature(&payload, &signature)
            .expect("signature should verify");

        match parse_event(&event).expect("event should parse") {
            PaymentEventKind::Succeeded {
                external_id,
                amount,
                invoice_id: parsed,
            } => {
                assert_eq!(external_id, "pay_abc");
                assert_eq!(amount, 12_500);
                assert_eq!(parsed, invoice_id);
            }
            other => panic!("unexpected event kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsigned_webhook_is_rejected() {
        let client = PaymentClient::new(&payment_config("http://localhost:1", "whsec_test"));
        let err = client
            .verify_webhook_signature("{}", "t=123")
            .expect_err("missing v1 component must fail");
        assert_eq!(err.kind(), "unauthorized");
    }
}
