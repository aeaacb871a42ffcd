use super::{CorrelationId, MessageLog, StagedMessage};
use crate::common::Indicator;
use crate::error::FaultlineError;
use crate::exception::{AppException, ExceptionKind};
use crate::format::ResponseFormat;
use crate::snapshot::RequestMetadata;
use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{Method, Request, request::Parts},
};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Per-request state threaded to business code.
///
/// Created fresh by the pipeline when a request enters and dropped when it
/// leaves. Clones share the same request; nothing in here is ever shared
/// between two requests.
///
/// # Example
/// ```rust,ignore
/// async fn submit_order(ctx: RequestContext, Json(order): Json<Order>) -> Result<Json<Receipt>, AppException> {
///     if order.qty <= 0 {
///         return Err(ctx.throw(ExceptionKind::Validation, "Quantity must be greater than 0."));
///     }
///     Ok(Json(place(order)?))
/// }
/// ```
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    request_id: Uuid,
    method: Method,
    format: ResponseFormat,
    metadata: RequestMetadata,
    acting_user: OnceLock<String>,
    messages: MessageLog,
}

impl RequestContext {
    pub fn new(request: &Request<Body>, format: ResponseFormat) -> Self {
        let request_id = Uuid::new_v4();
        Self {
            inner: Arc::new(ContextInner {
                request_id,
                method: request.method().clone(),
                format,
                metadata: RequestMetadata::capture(request, request_id),
                acting_user: OnceLock::new(),
                messages: MessageLog::new(),
            }),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.inner.request_id
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn path(&self) -> &str {
        &self.inner.metadata.path
    }

    pub fn format(&self) -> ResponseFormat {
        self.inner.format
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.inner.metadata
    }

    pub fn acting_user(&self) -> Option<&str> {
        self.inner.acting_user.get().map(String::as_str)
    }

    /// Records who the request acts as. Only the first call has effect.
    pub(crate) fn set_acting_user(&self, user: String) {
        let _ = self.inner.acting_user.set(user);
    }

    pub fn messages(&self) -> &MessageLog {
        &self.inner.messages
    }

    pub fn stage(
        &self,
        message: impl Into<String>,
        title: Option<String>,
        indicator: Indicator,
    ) -> CorrelationId {
        self.inner.messages.stage(message, title, indicator)
    }

    pub fn resolve(&self, correlation_id: &CorrelationId) -> Option<StagedMessage> {
        self.inner.messages.resolve(correlation_id)
    }

    /// Stages `message` and returns an exception already linked to it.
    pub fn throw(&self, kind: ExceptionKind, message: impl Into<String>) -> AppException {
        let message = message.into();
        let correlation_id =
            self.stage(message.clone(), None, kind.default_indicator());
        AppException::new(kind, message).attach(correlation_id)
    }

    /// Like [`throw`](Self::throw) with an explicit title.
    pub fn throw_titled(
        &self,
        kind: ExceptionKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> AppException {
        let title = title.into();
        let message = message.into();
        let correlation_id =
            self.stage(message.clone(), Some(title.clone()), kind.default_indicator());
        AppException::new(kind, message)
            .with_title(title)
            .attach(correlation_id)
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppException;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or_else(|| {
            AppException::internal(FaultlineError::Internal(
                "RequestContext requested outside the fault pipeline".to_string(),
            ))
        })
    }
}
