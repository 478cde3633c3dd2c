use reqwest::StatusCode;
use serde::Deserialize;

use crate::firestore::error::{
    aborted, deadline_exceeded, internal_error, not_found, permission_denied, rejected,
    resource_exhausted, unauthenticated, unavailable, FirestoreError,
};

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: Option<GoogleError>,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Maps a non-success response to an error. Server-side refusals never become validation
/// errors; those are reserved for checks made before a request is sent.
pub fn map_http_error(status: StatusCode, body: &str) -> FirestoreError {
    let payload = extract_error_payload(body);
    let message = payload
        .as_ref()
        .and_then(|payload| payload.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("HTTP error").to_string());
    let message = format!("HTTP {}: {message}", status.as_u16());

    if let Some(status_string) = payload.as_ref().and_then(|payload| payload.status.as_deref()) {
        if let Some(error) = map_status_code(status_string, &message) {
            return error;
        }
    }

    match status {
        StatusCode::UNAUTHORIZED => unauthenticated(message),
        StatusCode::FORBIDDEN => permission_denied(message),
        StatusCode::NOT_FOUND => not_found(message),
        StatusCode::CONFLICT => aborted(message),
        StatusCode::TOO_MANY_REQUESTS => resource_exhausted(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => deadline_exceeded(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => unavailable(message),
        status if status.is_client_error() => rejected(message),
        _ => internal_error(message),
    }
}

fn map_status_code(status: &str, message: &str) -> Option<FirestoreError> {
    let message = message.to_string();
    let error = match status {
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "OUT_OF_RANGE" | "ALREADY_EXISTS" => {
            rejected(message)
        }
        "UNAUTHENTICATED" => unauthenticated(message),
        "PERMISSION_DENIED" => permission_denied(message),
        "NOT_FOUND" => not_found(message),
        "ABORTED" => aborted(message),
        "RESOURCE_EXHAUSTED" => resource_exhausted(message),
        "UNAVAILABLE" => unavailable(message),
        "DEADLINE_EXCEEDED" => deadline_exceeded(message),
        "CANCELLED" | "DATA_LOSS" | "UNKNOWN" | "INTERNAL" => internal_error(message),
        _ => return None,
    };
    Some(error)
}

fn extract_error_payload(body: &str) -> Option<GoogleError> {
    serde_json::from_str::<GoogleErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::{ErrorKind, FirestoreErrorCode};

    #[test]
    fn payload_status_wins_over_http_status() {
        let body = r#"{"error":{"code":400,"message":"order by clause cannot contain more fields","status":"INVALID_ARGUMENT"}}"#;
        let error = map_http_error(StatusCode::BAD_REQUEST, body);
        assert_eq!(error.code, FirestoreErrorCode::Rejected);
        assert_eq!(error.kind(), ErrorKind::Transport);
        assert!(error.message().contains("order by clause"));
    }

    #[test]
    fn falls_back_to_http_status() {
        let error = map_http_error(StatusCode::SERVICE_UNAVAILABLE, "upstream down");
        assert_eq!(error.code, FirestoreErrorCode::Unavailable);
        assert!(error.message().contains("503"));

        let error = map_http_error(StatusCode::UNAUTHORIZED, "");
        assert_eq!(error.code, FirestoreErrorCode::Unauthenticated);
    }
}
