use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::InferenceConfig;
use crate::shared::error::EngineError;

/// Structured-JSON classification contract. Scoring, next-action
/// suggestion, activity summaries and post-call stage suggestions all go
/// through this one shape: a JSON request in, a JSON verdict out, bounded
/// by the configured token budget.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn classify(&self, request: &Value) -> Result<Value, EngineError>;
}

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(cfg: &InferenceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url.clone(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
        }
    }
}

#[async_trait]
impl InferenceProvider for OpenAiClient {
    async fn classify(&self, request: &Value) -> Result<Value, EngineError> {
        let instruction = request
            .get("instruction")
            .and_then(|v| v.as_str())
            .unwrap_or("Classify the following context and reply with JSON only.");
        let context = request.get("context").cloned().unwrap_or(Value::Null);

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": instruction },
                { "role": "user", "content": context.to_string() }
            ]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::External(format!("inference request failed: {e}")))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| EngineError::External(format!("inference response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(EngineError::External(format!(
                "inference returned HTTP {status}: {payload}"
            )));
        }

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        serde_json::from_str(content)
            .map_err(|e| EngineError::External(format!("inference reply is not JSON: {e}")))
    }
}
