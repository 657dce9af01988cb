use axum::http::HeaderMap;
use diesel::prelude::*;
use std::sync::Arc;

use crate::shared::error::EngineError;
use crate::shared::models::User;
use crate::shared::schema::users;
use crate::shared::state::AppState;

const ADMIN_ROLE: &str = "admin";

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn user_by_token(conn: &mut PgConnection, token: &str) -> Result<User, EngineError> {
    users::table
        .filter(users::api_token.eq(token))
        .filter(users::is_active.eq(true))
        .first::<User>(conn)
        .optional()?
        .ok_or(EngineError::Unauthorized)
}

/// Resolves the acting user from a Bearer token. Used by the human-facing
/// endpoints (manual transitions, booking dispositions).
pub async fn require_user(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<User, EngineError> {
    let token = bearer_token(headers).ok_or(EngineError::Unauthorized)?;
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        user_by_token(&mut conn, &token)
    })
    .await
    .map_err(|e| EngineError::Storage(format!("auth lookup failed: {e}")))?
}

/// Sweep endpoints accept any one of three credentials: the cron shared
/// secret, the webhook shared secret, or an administrator session token.
pub async fn verify_sweep_auth(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<(), EngineError> {
    if let Some(secret) = header_value(headers, "x-cron-secret") {
        if secret == state.config.secrets.cron_secret {
            return Ok(());
        }
    }
    if let Some(secret) = header_value(headers, "x-webhook-secret") {
        if secret == state.config.secrets.webhook_secret {
            return Ok(());
        }
    }
    if bearer_token(headers).is_some() {
        let user = require_user(state, headers).await?;
        if user.role == ADMIN_ROLE {
            return Ok(());
        }
        return Err(EngineError::Forbidden);
    }
    Err(EngineError::Unauthorized)
}

pub fn verify_intake_secret(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<(), EngineError> {
    match header_value(headers, "x-intake-secret") {
        Some(secret) if secret == state.config.secrets.intake_secret => Ok(()),
        _ => Err(EngineError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        let mut bad = HeaderMap::new();
        bad.insert("authorization", "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&bad), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
