//! Mapping of BigQuery HTTP and job errors onto [`StoreError`].

use bqsync_core::StoreError;
use reqwest::StatusCode;

use crate::model::{ErrorProto, ErrorResponse};

/// Error reasons BigQuery documents as safe to retry.
const TRANSIENT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "backendError",
    "internalError",
    "jobBackendError",
    "jobInternalError",
    "timeout",
];

fn is_transient_reason(reason: &str) -> bool {
    TRANSIENT_REASONS.contains(&reason)
}

/// Classify a non-success HTTP response.
pub fn classify_response(status: StatusCode, body: &str) -> StoreError {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let (reason, message) = match &parsed {
        Some(resp) => (
            resp.error
                .errors
                .first()
                .and_then(|e| e.reason.clone())
                .unwrap_or_default(),
            resp.error.message.clone(),
        ),
        None => (String::new(), body.trim().to_string()),
    };
    let detail = if reason.is_empty() {
        format!("HTTP {}: {}", status.as_u16(), message)
    } else {
        format!("HTTP {} ({}): {}", status.as_u16(), reason, message)
    };

    match status {
        StatusCode::UNAUTHORIZED => StoreError::Auth(detail),
        StatusCode::FORBIDDEN if is_transient_reason(&reason) => StoreError::Transient(detail),
        StatusCode::FORBIDDEN => StoreError::PermissionDenied(detail),
        StatusCode::NOT_FOUND => StoreError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => StoreError::Transient(detail),
        s if s.is_server_error() => StoreError::Transient(detail),
        StatusCode::BAD_REQUEST if is_transient_reason(&reason) => StoreError::Transient(detail),
        StatusCode::BAD_REQUEST => StoreError::InvalidRequest(detail),
        _ => StoreError::Rejected(detail),
    }
}

/// Classify the `errorResult` of a finished job.
pub fn classify_job_error(error: &ErrorProto) -> StoreError {
    let reason = error.reason.as_deref().unwrap_or_default();
    let message = error.message.clone().unwrap_or_else(|| "job failed".to_string());
    let detail = format!("{}: {}", reason, message);
    match reason {
        r if is_transient_reason(r) => StoreError::Transient(detail),
        "notFound" => StoreError::NotFound(detail),
        "accessDenied" => StoreError::PermissionDenied(detail),
        "invalid" | "invalidQuery" => StoreError::InvalidRequest(detail),
        _ => StoreError::Rejected(detail),
    }
}

/// Transport-level failures (connect, timeout, reset) are transient;
/// undecodable bodies are not.
pub fn classify_transport(err: reqwest::Error) -> StoreError {
    if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Transient(err.to_string())
    }
}
