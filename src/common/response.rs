use crate::common::Indicator;
use crate::correlation::CorrelationId;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Serialize, Serializer};

/// Structured error payload returned to API and AJAX clients.
///
/// The shape is stable across every failure, 5xx included, so clients can
/// always read `message`, `title` and `indicator`.
///
/// # Example
/// ```
/// use faultline::common::{ErrorEnvelope, Indicator};
///
/// let envelope = ErrorEnvelope::new(417, "Quantity must be greater than 0.")
///     .with_exc_type("Validation");
/// let json = serde_json::to_value(&envelope).unwrap();
/// assert_eq!(json["exception_raised"], 1);
/// assert_eq!(json["indicator"], "red");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub message: String,

    pub title: String,

    pub indicator: Indicator,

    #[serde(serialize_with = "bool_as_flag")]
    pub exception_raised: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,

    pub status_code: u16,

    pub exc_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

pub const DEFAULT_TITLE: &str = "Message";

impl ErrorEnvelope {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            title: DEFAULT_TITLE.to_string(),
            indicator: Indicator::Red,
            exception_raised: true,
            correlation_id: None,
            status_code,
            exc_type: String::new(),
            traceback: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_indicator(mut self, indicator: Indicator) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<CorrelationId>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_exc_type(mut self, exc_type: impl Into<String>) -> Self {
        self.exc_type = exc_type.into();
        self
    }

    pub fn with_traceback(mut self, traceback: Option<String>) -> Self {
        self.traceback = traceback;
        self
    }

    pub fn http_status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

fn bool_as_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> Response {
        // The transport status line always mirrors the envelope's status_code.
        (self.http_status(), Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_omits_absent_fields() {
        let json = serde_json::to_value(ErrorEnvelope::new(404, "gone")).unwrap();
        assert_eq!(json["title"], "Message");
        assert_eq!(json["status_code"], 404);
        assert!(json.get("correlation_id").is_none());
        assert!(json.get("traceback").is_none());
    }

    #[test]
    fn test_envelope_status_line_mirrors_body() {
        let response = ErrorEnvelope::new(409, "conflict").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_invalid_status_falls_back_to_500() {
        let envelope = ErrorEnvelope::new(42, "bogus");
        assert_eq!(envelope.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
