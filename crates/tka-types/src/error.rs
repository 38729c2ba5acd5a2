//! The crate-wide error envelope (spec.md §6, §7).
//!
//! Every error that reaches an HTTP response carries a `message`, an
//! ordered list of `advice` strings, and an optional recursive `cause` —
//! mirroring the teacher's `ApiError`/`ApiResult` split (constructors named
//! after the status they produce, a single `IntoResponse` impl, `From`
//! conversions at the boundary) but reshaped to this crate's envelope,
//! which nests causes instead of carrying a bare `error` tag.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Wire shape of an error response: `{"message", "advice", "cause"}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advice: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorEnvelope>>,
}

/// The crate's single error type. Carries everything needed to render the
/// envelope plus the HTTP status and, for 202/503 responses, a `Retry-After`
/// value.
#[derive(Debug)]
pub struct TkaError {
    pub status: StatusCode,
    pub message: String,
    pub advice: Vec<String>,
    pub cause: Option<Box<TkaError>>,
    pub retry_after_secs: Option<u64>,
}

pub type TkaResult<T> = Result<T, TkaError>;

impl TkaError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            advice: Vec::new(),
            cause: None,
            retry_after_secs: None,
        }
    }

    pub fn with_advice(mut self, advice: impl Into<String>) -> Self {
        self.advice.push(advice.into());
        self
    }

    pub fn with_cause(mut self, cause: TkaError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// A 202 Accepted "not ready yet" response, carrying a `Retry-After`
    /// header (spec.md §4.E/§4.F). Not an error in the usual sense — used
    /// on the same `Result` return path as a genuine error because axum's
    /// extractor/handler plumbing only offers one error channel per
    /// handler, exactly as the teacher's handlers return `ApiResult<T>` for
    /// both the success and the "not ready" branch.
    pub fn accepted_not_ready(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::new(StatusCode::ACCEPTED, message).with_retry_after(retry_after_secs)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            message: self.message.clone(),
            advice: self.advice.clone(),
            cause: self.cause.as_ref().map(|c| Box::new(c.to_envelope())),
        }
    }
}

impl std::fmt::Display for TkaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TkaError {}

impl IntoResponse for TkaError {
    fn into_response(self) -> Response {
        let status = self.status;
        let retry_after = self.retry_after_secs;
        let envelope = self.to_envelope();

        if status.is_server_error() {
            tracing::error!(status = %status, message = %envelope.message, "request failed");
        } else {
            tracing::debug!(status = %status, message = %envelope.message, "request rejected");
        }

        let mut response = (status, Json(envelope)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

impl From<crate::duration::DurationParseError> for TkaError {
    fn from(err: crate::duration::DurationParseError) -> Self {
        TkaError::bad_request(err.to_string())
    }
}

impl From<crate::capability::RankError> for TkaError {
    fn from(err: crate::capability::RankError) -> Self {
        match err {
            crate::capability::RankError::Empty => TkaError::forbidden(err.to_string()),
            crate::capability::RankError::Tie => TkaError::bad_request(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json_with_nested_cause() {
        let err = TkaError::internal_error("token mint failed")
            .with_advice("retry shortly")
            .with_cause(TkaError::internal_error("cluster api unreachable"));
        let envelope = err.to_envelope();

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: ErrorEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(envelope, decoded);
        assert_eq!(decoded.cause.unwrap().message, "cluster api unreachable");
    }

    #[test]
    fn envelope_without_advice_or_cause_omits_both_fields() {
        let err = TkaError::not_found("no sign-in record for user");
        let encoded = serde_json::to_string(&err.to_envelope()).unwrap();
        assert!(!encoded.contains("advice"));
        assert!(!encoded.contains("cause"));
    }
}
