//! Errors from the case service HTTP collaborators.

/// Failure of a create/decide/fetch request.
///
/// Command failures are handed straight back to the caller; nothing in the
/// local store is rolled back because nothing was applied optimistically.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Case service is not reachable at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Case service rejected the request (status {status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Transport-level failure (the request may never have reached the server).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::Connection(_) | ApiError::Timeout(_) | ApiError::HttpClient(_)
        )
    }

    /// Message suitable for showing to the person who issued the command.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected { detail, .. } => detail.clone(),
            ApiError::InvalidRequest(detail) => detail.clone(),
            ApiError::Connection(_) | ApiError::Timeout(_) | ApiError::HttpClient(_) => {
                "The case service is unavailable. Please try again.".to_string()
            }
            ApiError::ResponseParsing(_) => {
                "The case service returned an unexpected response.".to_string()
            }
        }
    }
}

/// Pull the human-readable reason out of a `{"detail": ...}` error body.
///
/// `detail` may be a plain string or a structured validation report; anything
/// unparseable falls back to `fallback`.
pub(crate) fn error_detail(body: &str, fallback: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return fallback.to_string();
    };
    match value.get("detail") {
        Some(serde_json::Value::String(detail)) if !detail.is_empty() => detail.clone(),
        Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => {
            fallback.to_string()
        }
        Some(other) => other.to_string(),
    }
}
