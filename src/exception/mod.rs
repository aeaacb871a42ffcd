//! Exception taxonomy
//!
//! Every failure that crosses the pipeline boundary is an [`AppException`]
//! carrying one [`ExceptionKind`]. Business code raises them with `?`, the
//! coordinator catches them, and [`classify`] turns them into a status code.
//!
//! | Kind | Default status |
//! |------|----------------|
//! | `Validation` | 417 Expectation Failed |
//! | `Authentication` | 401 Unauthorized |
//! | `PermissionDenied` | 403 Forbidden |
//! | `NotFound` | 404 Not Found |
//! | `Conflict` | 409 Conflict |
//! | `ServiceUnavailable` | 503 Service Unavailable |
//! | `Internal` | 500 Internal Server Error |

use crate::common::{ErrorEnvelope, Indicator, response::DEFAULT_TITLE};
use crate::correlation::CorrelationId;
use crate::error::FaultlineError;
use crate::guard::GuardError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

mod abort;
mod classify;

pub use abort::HttpAbort;
pub use classify::{Classification, classify, classify_error};

pub(crate) use abort::AbortMarker;

/// Closed set of failure categories.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum ExceptionKind {
    Validation,
    Authentication,
    PermissionDenied,
    NotFound,
    Conflict,
    /// The session was terminated underneath the client (maintenance, restart).
    ServiceUnavailable,
    Internal,
}

impl ExceptionKind {
    pub fn default_status(self) -> StatusCode {
        match self {
            ExceptionKind::Validation => StatusCode::EXPECTATION_FAILED,
            ExceptionKind::Authentication => StatusCode::UNAUTHORIZED,
            ExceptionKind::PermissionDenied => StatusCode::FORBIDDEN,
            ExceptionKind::NotFound => StatusCode::NOT_FOUND,
            ExceptionKind::Conflict => StatusCode::CONFLICT,
            ExceptionKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ExceptionKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Page title used when the exception carries none.
    pub fn default_title(self) -> &'static str {
        match self {
            ExceptionKind::Authentication => "Session Expired",
            ExceptionKind::PermissionDenied => "Not Permitted",
            ExceptionKind::NotFound => "Not Found",
            ExceptionKind::ServiceUnavailable => "Updating",
            ExceptionKind::Internal => "Server Error",
            ExceptionKind::Validation | ExceptionKind::Conflict => "Message",
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ExceptionKind::Validation => "The submitted data is invalid.",
            ExceptionKind::Authentication => "You need to be logged in to access this resource.",
            ExceptionKind::PermissionDenied => {
                "You do not have enough permissions to complete the action."
            }
            ExceptionKind::NotFound => "The resource you are looking for is not available.",
            ExceptionKind::Conflict => {
                "The record was modified by another request. Please refresh and try again."
            }
            ExceptionKind::ServiceUnavailable => {
                "The system is being updated. Please refresh again after a few moments."
            }
            ExceptionKind::Internal => "Something went wrong while processing this request.",
        }
    }

    /// Closest kind for a bare status code, used for responses that carry
    /// no exception of their own.
    pub fn for_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ExceptionKind::Authentication,
            StatusCode::FORBIDDEN => ExceptionKind::PermissionDenied,
            StatusCode::NOT_FOUND => ExceptionKind::NotFound,
            StatusCode::CONFLICT => ExceptionKind::Conflict,
            StatusCode::SERVICE_UNAVAILABLE => ExceptionKind::ServiceUnavailable,
            status if status.is_server_error() => ExceptionKind::Internal,
            _ => ExceptionKind::Validation,
        }
    }

    pub fn default_indicator(self) -> Indicator {
        match self {
            ExceptionKind::ServiceUnavailable => Indicator::Orange,
            _ => Indicator::Red,
        }
    }
}

/// A typed application failure.
///
/// The kind is fixed at construction. Builders only refine how the failure is
/// presented (status override, title, indicator) or linked (correlation id,
/// source error).
///
/// # Example
/// ```
/// use faultline::exception::{AppException, ExceptionKind};
/// use axum::http::StatusCode;
///
/// fn check_quantity(qty: i64) -> Result<(), AppException> {
///     if qty <= 0 {
///         return Err(AppException::validation("Quantity must be greater than 0."));
///     }
///     Ok(())
/// }
///
/// let err = check_quantity(0).unwrap_err();
/// assert_eq!(err.kind(), ExceptionKind::Validation);
/// assert_eq!(err.status(), StatusCode::EXPECTATION_FAILED);
/// ```
pub struct AppException {
    kind: ExceptionKind,
    status: Option<StatusCode>,
    message: String,
    title: Option<String>,
    indicator: Indicator,
    correlation_id: Option<CorrelationId>,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl AppException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            title: None,
            indicator: kind.default_indicator(),
            correlation_id: None,
            source: None,
            backtrace: Backtrace::capture(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Authentication, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::PermissionDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Conflict, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ServiceUnavailable, message)
    }

    /// Wraps an unrecognized failure.
    ///
    /// The client only ever sees the generic `Internal` message; the source
    /// stays attached for the persisted snapshot.
    pub fn internal(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        Self::new(
            ExceptionKind::Internal,
            ExceptionKind::Internal.default_message(),
        )
        .with_source(source)
    }

    /// Rebuilds an exception from a response that failed without raising one,
    /// such as an extractor rejection or an unmatched route. The status is
    /// kept as an override whenever it differs from the kind's default.
    pub fn from_status(status: StatusCode, message: Option<String>) -> Self {
        let kind = ExceptionKind::for_status(status);
        let message = message.unwrap_or_else(|| kind.default_message().to_string());
        let exception = Self::new(kind, message);
        if status == kind.default_status() {
            exception
        } else {
            exception.with_status(status)
        }
    }

    /// Overrides the table status for business-defined failures.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_indicator(mut self, indicator: Indicator) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn with_source(mut self, source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Links this exception to a previously staged message.
    pub fn attach(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn kind(&self) -> ExceptionKind {
        self.kind
    }

    pub fn status_override(&self) -> Option<StatusCode> {
        self.status
    }

    /// Effective status: the override if present, otherwise the table default.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or_else(|| self.kind.default_status())
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// Full diagnostic text: kind, message, cause chain and, when captured,
    /// the stack backtrace.
    pub fn traceback(&self) -> String {
        let mut out = format!("{}: {}", self.kind, self.message);

        let mut cause = self.source.as_deref().map(|e| e as &(dyn Error + 'static));
        let mut depth = 0;
        while let Some(err) = cause {
            if depth == 0 {
                out.push_str("\n\nCaused by:");
            }
            out.push_str(&format!("\n    {}: {}", depth, err));
            depth += 1;
            cause = err.source();
        }

        if self.backtrace.status() == BacktraceStatus::Captured {
            out.push_str("\n\nStack backtrace:\n");
            out.push_str(&self.backtrace.to_string());
        }
        out
    }

    /// Response used when no pipeline is installed around the handler.
    fn fallback_response(&self) -> Response {
        ErrorEnvelope::new(self.status().as_u16(), self.message.clone())
            .with_title(self.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string()))
            .with_indicator(self.indicator)
            .with_correlation_id(self.correlation_id)
            .with_exc_type(self.kind.as_ref())
            .into_response()
    }
}

impl fmt::Debug for AppException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppException")
            .field("kind", &self.kind)
            .field("status", &self.status())
            .field("message", &self.message)
            .field("title", &self.title)
            .field("correlation_id", &self.correlation_id)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for AppException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for AppException {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Response extension carrying the exception a handler returned, so the
/// coordinator can finish the response itself.
#[derive(Clone)]
pub(crate) struct RaisedException(pub(crate) Arc<AppException>);

impl IntoResponse for AppException {
    fn into_response(self) -> Response {
        let mut response = self.fallback_response();
        response
            .extensions_mut()
            .insert(RaisedException(Arc::new(self)));
        response
    }
}

impl From<anyhow::Error> for AppException {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AppException>() {
            Ok(exception) => exception,
            Err(err) => AppException::internal(err),
        }
    }
}

impl From<GuardError> for AppException {
    fn from(err: GuardError) -> Self {
        match &err {
            GuardError::Unauthorized(message) => AppException::authentication(message.clone()),
            GuardError::Forbidden(message) => AppException::permission_denied(message.clone()),
        }
    }
}

impl From<FaultlineError> for AppException {
    fn from(err: FaultlineError) -> Self {
        AppException::internal(err)
    }
}

#[cfg(feature = "sea-orm-db")]
impl From<sea_orm::DbErr> for AppException {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::RecordNotFound(message) => AppException::not_found(message),
            other => AppException::internal(other),
        }
    }
}

/// Anything a handler may fail with: a classified exception, or a
/// transport-level abort that is sent back untouched.
#[derive(Debug)]
pub enum Fault {
    Exception(AppException),
    Abort(HttpAbort),
}

impl IntoResponse for Fault {
    fn into_response(self) -> Response {
        match self {
            Fault::Exception(exception) => exception.into_response(),
            Fault::Abort(abort) => abort.into_response(),
        }
    }
}

impl From<AppException> for Fault {
    fn from(exception: AppException) -> Self {
        Fault::Exception(exception)
    }
}

impl From<HttpAbort> for Fault {
    fn from(abort: HttpAbort) -> Self {
        Fault::Abort(abort)
    }
}

impl From<anyhow::Error> for Fault {
    fn from(err: anyhow::Error) -> Self {
        Fault::Exception(err.into())
    }
}

impl From<GuardError> for Fault {
    fn from(err: GuardError) -> Self {
        Fault::Exception(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_kind_has_error_class_status() {
        for kind in ExceptionKind::iter() {
            let status = kind.default_status();
            assert!(status.is_client_error() || status.is_server_error(), "{kind}");
        }
    }

    #[test]
    fn test_internal_wraps_source_with_generic_message() {
        let err = AppException::internal(anyhow::anyhow!("connection reset by peer"));
        assert_eq!(err.kind(), ExceptionKind::Internal);
        assert_eq!(err.message(), ExceptionKind::Internal.default_message());
        assert!(err.traceback().contains("connection reset by peer"));
    }

    #[test]
    fn test_anyhow_round_trip_keeps_kind() {
        let original = anyhow::Error::new(AppException::conflict("stale version"));
        let recovered = AppException::from(original);
        assert_eq!(recovered.kind(), ExceptionKind::Conflict);
        assert_eq!(recovered.message(), "stale version");
    }

    #[test]
    fn test_guard_errors_map_to_auth_kinds() {
        let unauthorized = AppException::from(GuardError::Unauthorized("no session".into()));
        assert_eq!(unauthorized.kind(), ExceptionKind::Authentication);
        let forbidden = AppException::from(GuardError::Forbidden("read only".into()));
        assert_eq!(forbidden.kind(), ExceptionKind::PermissionDenied);
    }

    #[test]
    fn test_into_response_tags_exception() {
        let response = AppException::not_found("no such invoice").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let raised = response.extensions().get::<RaisedException>().unwrap();
        assert_eq!(raised.0.message(), "no such invoice");
    }

    #[test]
    fn test_service_unavailable_defaults_to_orange() {
        let err = AppException::service_unavailable("restarting");
        assert_eq!(err.indicator(), Indicator::Orange);
    }

    #[test]
    fn test_from_status_keeps_rejection_status() {
        let rejected = AppException::from_status(
            StatusCode::BAD_REQUEST,
            Some("Failed to parse the request body as JSON".into()),
        );
        assert_eq!(rejected.kind(), ExceptionKind::Validation);
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rejected.message(), "Failed to parse the request body as JSON");

        let unmatched = AppException::from_status(StatusCode::NOT_FOUND, None);
        assert_eq!(unmatched.kind(), ExceptionKind::NotFound);
        assert_eq!(unmatched.status_override(), None);
        assert_eq!(unmatched.message(), ExceptionKind::NotFound.default_message());

        let gateway = AppException::from_status(StatusCode::BAD_GATEWAY, None);
        assert_eq!(gateway.kind(), ExceptionKind::Internal);
        assert_eq!(gateway.status(), StatusCode::BAD_GATEWAY);
    }
}
