use axum::{response::IntoResponse, Json};
use uuid::Uuid;

/// Error taxonomy for the pipeline engine. Validation, not-found, conflict
/// and auth errors are terminal for the request; external and storage
/// failures are recorded and surfaced without retry.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{0} not found: {1}")]
    NotFound(&'static str, Uuid),
    #[error("Stage conflict: expected {expected}, found {actual}")]
    Conflict { expected: String, actual: String },
    #[error("Unknown stage: {0}")]
    InvalidStage(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("No active sales user available")]
    NoAvailableOwner,
    #[error("Too many requests")]
    RateLimited,
    #[error("Upstream call failed: {0}")]
    External(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_, _) => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::InvalidStage(_) => "invalid_stage",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NoAvailableOwner => "no_available_owner",
            Self::RateLimited => "rate_limited",
            Self::External(_) => "external_failure",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<diesel::result::Error> for EngineError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            Self::Validation(_) | Self::InvalidStage(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_, _) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NoAvailableOwner => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::External(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string(), "kind": self.kind() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_taxonomy() {
        assert_eq!(EngineError::Validation("x".into()).kind(), "validation");
        assert_eq!(
            EngineError::Conflict {
                expected: "qualified".into(),
                actual: "new_enquiry".into()
            }
            .kind(),
            "conflict"
        );
        assert_eq!(EngineError::NoAvailableOwner.kind(), "no_available_owner");
        assert_eq!(EngineError::External("down".into()).kind(), "external_failure");
    }
}
