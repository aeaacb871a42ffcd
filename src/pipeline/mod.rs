//! Request lifecycle coordinator
//!
//! Drives one request through
//! `Init → Authenticated → Dispatching → {Succeeded | Failed} → Finalizing → Done`.
//!
//! Every failure raised while the request is in flight ends up here: guard
//! denials, exceptions returned by handlers, inner service errors and panics.
//! Finalization runs in a fixed order: transaction decision, rendering,
//! after-request hooks, then the error logger. Nothing past dispatch can turn
//! a delivered response into a different one, except a failed commit.
//!
//! # Example
//! ```rust,ignore
//! let pipeline = FaultPipeline::builder()
//!     .guard(Arc::new(HeaderSessionGuard::new(HeaderName::from_static("x-session-user")).protect("/app")))
//!     .transaction_manager(Arc::new(SeaOrmTransactionManager::new(conn)))
//!     .snapshot_sink(Arc::new(TracingSnapshotSink))
//!     .build();
//!
//! let app = Router::new()
//!     .route("/api/orders", post(submit_order))
//!     .layer(FaultLayer::new(pipeline));
//! ```

use crate::config::ConfigService;
use crate::correlation::RequestContext;
use crate::error::FaultlineError;
use crate::exception::{AbortMarker, AppException, RaisedException, classify};
use crate::format::{DefaultPageRenderer, PageRenderer, ResponseFormat, ResponseFormatter};
use crate::guard::Guard;
use crate::hooks::{AfterRequestHook, HookRunner};
use crate::redaction::{Redactor, TraceFlags};
use crate::snapshot::{ErrorLogger, SnapshotSink};
use crate::transactional::{
    ACTIVE_TRANSACTION, ActiveTransaction, RequestOutcome, TransactionGuard, TransactionManager,
    TransactionOptions, TransactionOutcome,
};
use axum::{
    body::Body,
    http::{Method, Request, header, request::Parts},
    response::Response,
};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use strum_macros::{AsRefStr, Display};
use tower::{BoxError, Service, ServiceExt};
use tracing::Instrument;

mod layer;

pub use layer::{FaultLayer, FaultService};

pub const DEFAULT_API_PREFIX: &str = "/api/";

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum RequestState {
    Init,
    Authenticated,
    Dispatching,
    Succeeded,
    Failed,
    Finalizing,
    Done,
}

/// What dispatch produced.
enum Dispatch {
    Succeeded(Response),
    Failed(Arc<AppException>),
    /// Deliberate short-circuit; delivered verbatim.
    Aborted(Response),
    /// A 5xx built without raising. Delivered verbatim but still recorded.
    Unraised(Response, Arc<AppException>),
}

/// Longest rejection text read back from an untagged 4xx body.
const REJECTION_BODY_LIMIT: usize = 4 * 1024;

impl Dispatch {
    async fn from_response(mut response: Response) -> Self {
        if let Some(RaisedException(exception)) = response.extensions_mut().remove::<RaisedException>() {
            return Dispatch::Failed(exception);
        }
        if response.extensions_mut().remove::<AbortMarker>().is_some() {
            return Dispatch::Aborted(response);
        }

        let status = response.status();
        if status.is_server_error() {
            let exception = AppException::internal(FaultlineError::Internal(format!(
                "handler responded {status} without raising an exception"
            )))
            .with_status(status);
            return Dispatch::Unraised(response, Arc::new(exception));
        }
        // Extractor rejections and unmatched routes never raise. Send them
        // through the formatter like any other client failure.
        if status.is_client_error() {
            let message = rejection_message(response).await;
            return Dispatch::failed(AppException::from_status(status, message));
        }
        Dispatch::Succeeded(response)
    }

    fn failed(exception: AppException) -> Self {
        Dispatch::Failed(Arc::new(exception))
    }

    fn outcome(&self) -> RequestOutcome {
        match self {
            Dispatch::Succeeded(_) => RequestOutcome::Succeeded,
            Dispatch::Failed(_) | Dispatch::Aborted(_) | Dispatch::Unraised(..) => {
                RequestOutcome::Failed
            }
        }
    }

    fn state(&self) -> RequestState {
        match self.outcome() {
            RequestOutcome::Succeeded => RequestState::Succeeded,
            RequestOutcome::Failed => RequestState::Failed,
        }
    }
}

/// Plain-text body of a rejection, if it has one worth showing.
async fn rejection_message(response: Response) -> Option<String> {
    let is_text = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/plain"));
    if !is_text {
        return None;
    }
    let bytes = axum::body::to_bytes(response.into_body(), REJECTION_BODY_LIMIT)
        .await
        .ok()?;
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Renders a panic payload for logs.
pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The configured coordinator. Shared by every request through [`FaultLayer`].
pub struct FaultPipeline {
    guards: Vec<Arc<dyn Guard>>,
    transactions: Option<Arc<dyn TransactionManager>>,
    formatter: ResponseFormatter,
    logger: ErrorLogger,
    hooks: HookRunner,
    api_prefix: String,
}

impl FaultPipeline {
    pub fn builder() -> FaultPipelineBuilder {
        FaultPipelineBuilder::new()
    }

    pub fn formatter(&self) -> &ResponseFormatter {
        &self.formatter
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    /// Runs one request to completion. Never fails: every outcome becomes a
    /// response.
    pub(crate) async fn handle<S>(&self, inner: S, mut request: Request<Body>) -> Response
    where
        S: Service<Request<Body>, Response = Response> + Send,
        S::Future: Send,
        S::Error: Into<BoxError>,
    {
        let format = ResponseFormat::negotiate(request.headers(), request.uri().path(), &self.api_prefix);
        let ctx = RequestContext::new(&request, format);
        request.extensions_mut().insert(ctx.clone());

        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            path = ctx.path(),
        );

        async move {
            enter(RequestState::Init);

            let (parts, body) = request.into_parts();
            let mut transaction = None;
            let dispatch = match self.authenticate(&ctx, &parts).await {
                Err(exception) => Dispatch::failed(exception),
                Ok(()) => {
                    enter(RequestState::Authenticated);
                    match self.begin_transaction(&parts.method).await {
                        Err(exception) => Dispatch::failed(exception),
                        Ok(active) => {
                            let mut request = Request::from_parts(parts, body);
                            if let Some(active) = &active {
                                request.extensions_mut().insert(active.clone());
                            }
                            transaction = active.clone();
                            enter(RequestState::Dispatching);
                            call_inner(inner, request, active).await
                        }
                    }
                }
            };
            enter(dispatch.state());

            enter(RequestState::Finalizing);
            let response = self.finalize(&ctx, dispatch, transaction.as_ref()).await;

            let dropped = ctx.messages().clear();
            if dropped > 0 {
                tracing::debug!(dropped, "Dropped unlinked staged messages");
            }
            enter(RequestState::Done);
            response
        }
        .instrument(span)
        .await
    }

    async fn authenticate(&self, ctx: &RequestContext, parts: &Parts) -> Result<(), AppException> {
        for guard in &self.guards {
            if let Some(user) = guard.can_activate(parts).await? {
                ctx.set_acting_user(user);
            }
        }
        Ok(())
    }

    async fn begin_transaction(
        &self,
        method: &Method,
    ) -> Result<Option<ActiveTransaction>, AppException> {
        let Some(manager) = &self.transactions else {
            return Ok(None);
        };
        let transaction = manager.begin(TransactionOptions::for_method(method)).await?;
        Ok(Some(ActiveTransaction::new(transaction)))
    }

    async fn finalize(
        &self,
        ctx: &RequestContext,
        dispatch: Dispatch,
        transaction: Option<&ActiveTransaction>,
    ) -> Response {
        let dispatch = match transaction {
            Some(transaction) => self.settle(ctx, transaction, dispatch).await,
            None => dispatch,
        };

        let (mut response, exception) = match dispatch {
            Dispatch::Succeeded(response) | Dispatch::Aborted(response) => (response, None),
            Dispatch::Unraised(response, exception) => {
                tracing::warn!(
                    status = response.status().as_u16(),
                    "Server error response without an exception"
                );
                (response, Some(exception))
            }
            Dispatch::Failed(exception) => {
                let classification = classify(&exception);
                tracing::debug!(
                    kind = %classification.kind,
                    status = classification.status.as_u16(),
                    "Request failed"
                );
                (self.formatter.format(&exception, ctx.format()), Some(exception))
            }
        };

        self.hooks.run(ctx, &mut response).await;

        if let Some(exception) = exception {
            self.logger
                .log_if_needed(classify(&exception).status, &exception, ctx)
                .await;
        }
        response
    }

    /// Applies the commit/rollback decision. A failed commit turns the
    /// request into an internal failure.
    async fn settle(
        &self,
        ctx: &RequestContext,
        transaction: &ActiveTransaction,
        dispatch: Dispatch,
    ) -> Dispatch {
        let has_writes = transaction.has_writes().await;
        let decision = TransactionGuard::decide(ctx.method(), dispatch.outcome(), has_writes);
        tracing::debug!(%decision, has_writes, "Transaction decision");

        match TransactionGuard::apply(decision, transaction).await {
            Ok(()) => dispatch,
            Err(e) if decision == TransactionOutcome::Commit => {
                tracing::error!(error = %e, "Commit failed, rolling back");
                if let Err(rollback) =
                    TransactionGuard::apply(TransactionOutcome::Rollback, transaction).await
                {
                    tracing::error!(error = %rollback, "Rollback after failed commit also failed");
                }
                Dispatch::failed(AppException::internal(e))
            }
            Err(e) => {
                tracing::error!(error = %e, %decision, "Failed to finalize transaction");
                dispatch
            }
        }
    }
}

fn enter(state: RequestState) {
    tracing::debug!(state = state.as_ref(), "Request state");
}

/// Calls the inner service with the transaction in task-local scope.
async fn call_inner<S>(
    inner: S,
    request: Request<Body>,
    transaction: Option<ActiveTransaction>,
) -> Dispatch
where
    S: Service<Request<Body>, Response = Response> + Send,
    S::Future: Send,
    S::Error: Into<BoxError>,
{
    let call = ACTIVE_TRANSACTION.scope(transaction, inner.oneshot(request));
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(response)) => Dispatch::from_response(response).await,
        Ok(Err(e)) => {
            let error: BoxError = e.into();
            tracing::error!(error = %error, "Inner service failed");
            Dispatch::failed(AppException::internal(error))
        }
        Err(panic) => {
            let message = panic_message(&panic);
            tracing::error!(panic = %message, "Handler panicked");
            Dispatch::failed(AppException::internal(FaultlineError::Internal(format!(
                "handler panicked: {message}"
            ))))
        }
    }
}

/// Fluent configuration for [`FaultPipeline`].
pub struct FaultPipelineBuilder {
    guards: Vec<Arc<dyn Guard>>,
    transactions: Option<Arc<dyn TransactionManager>>,
    trace_flags: Option<Arc<dyn TraceFlags>>,
    renderer: Arc<dyn PageRenderer>,
    sink: Option<Arc<dyn SnapshotSink>>,
    hooks: HookRunner,
    api_prefix: String,
}

impl Default for FaultPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultPipelineBuilder {
    pub fn new() -> Self {
        Self {
            guards: Vec::new(),
            transactions: None,
            trace_flags: None,
            renderer: Arc::new(DefaultPageRenderer::default()),
            sink: None,
            hooks: HookRunner::new(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
        }
    }

    /// Guards run in registration order.
    pub fn guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transactions = Some(manager);
        self
    }

    /// Source of the development-mode and suppression flags. Defaults to a
    /// [`ConfigService`] loaded from the environment.
    pub fn trace_flags(mut self, flags: Arc<dyn TraceFlags>) -> Self {
        self.trace_flags = Some(flags);
        self
    }

    pub fn page_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Defaults to [`TracingSnapshotSink`](crate::snapshot::TracingSnapshotSink).
    pub fn snapshot_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Hooks run in registration order.
    pub fn hook(mut self, hook: Arc<dyn AfterRequestHook>) -> Self {
        self.hooks.register(hook);
        self
    }

    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    pub fn build(self) -> FaultPipeline {
        let flags = self
            .trace_flags
            .unwrap_or_else(|| Arc::new(ConfigService::new()));
        let logger = self.sink.map(ErrorLogger::new).unwrap_or_default();

        tracing::debug!(
            guards = self.guards.len(),
            hooks = self.hooks.len(),
            transactional = self.transactions.is_some(),
            api_prefix = %self.api_prefix,
            "Fault pipeline built"
        );

        FaultPipeline {
            guards: self.guards,
            transactions: self.transactions,
            formatter: ResponseFormatter::new(Redactor::new(flags), self.renderer),
            logger,
            hooks: self.hooks,
            api_prefix: self.api_prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{ExceptionKind, HttpAbort};
    use crate::redaction::StaticTraceFlags;
    use crate::snapshot::MemorySnapshotSink;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::convert::Infallible;
    use tower::service_fn;

    fn pipeline(sink: &MemorySnapshotSink) -> FaultPipeline {
        FaultPipeline::builder()
            .trace_flags(Arc::new(StaticTraceFlags::default()))
            .snapshot_sink(Arc::new(sink.clone()))
            .build()
    }

    fn request() -> Request<Body> {
        Request::builder()
            .uri("/api/method/ping")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_panic_message_payloads() {
        let from_str: Box<dyn Any + Send> = Box::new("static message");
        let from_string: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&from_str), "static message");
        assert_eq!(panic_message(&from_string), "owned message");
        assert_eq!(panic_message(&other), "unknown panic payload");
    }

    #[test]
    fn test_builder_defaults() {
        let pipeline = FaultPipeline::builder().build();
        assert_eq!(pipeline.api_prefix(), DEFAULT_API_PREFIX);
        assert!(pipeline.guards.is_empty());
        assert!(pipeline.transactions.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_reads_markers() {
        let raised = AppException::not_found("gone").into_response();
        assert!(matches!(Dispatch::from_response(raised).await, Dispatch::Failed(_)));

        let aborted = HttpAbort::new(StatusCode::TOO_MANY_REQUESTS).into_response();
        assert!(matches!(Dispatch::from_response(aborted).await, Dispatch::Aborted(_)));

        let plain = (StatusCode::CREATED, "ok").into_response();
        assert!(matches!(Dispatch::from_response(plain).await, Dispatch::Succeeded(_)));
    }

    #[tokio::test]
    async fn test_untagged_client_error_becomes_exception() {
        let rejection = (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected request with `Content-Type: application/json`",
        )
            .into_response();
        let Dispatch::Failed(exception) = Dispatch::from_response(rejection).await else {
            panic!("rejection should fail the request");
        };
        assert_eq!(exception.kind(), ExceptionKind::Validation);
        assert_eq!(exception.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(exception.message().contains("Content-Type: application/json"));

        let unmatched = StatusCode::NOT_FOUND.into_response();
        let Dispatch::Failed(exception) = Dispatch::from_response(unmatched).await else {
            panic!("unmatched route should fail the request");
        };
        assert_eq!(exception.kind(), ExceptionKind::NotFound);
        assert_eq!(exception.message(), ExceptionKind::NotFound.default_message());
    }

    #[tokio::test]
    async fn test_untagged_server_error_is_recorded_verbatim() {
        let sink = MemorySnapshotSink::new();
        let inner = service_fn(|_: Request<Body>| async {
            Ok::<_, Infallible>((StatusCode::BAD_GATEWAY, "upstream down").into_response())
        });

        let response = pipeline(&sink).handle(inner, request()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"upstream down");

        let snapshots = sink.snapshots().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].status_code, 502);
    }

    #[tokio::test]
    async fn test_inner_error_becomes_internal() {
        let sink = MemorySnapshotSink::new();
        let inner = service_fn(|_: Request<Body>| async {
            Err::<Response, _>(std::io::Error::other("socket closed"))
        });

        let response = pipeline(&sink).handle(inner, request()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(sink.len().await, 1);
    }

    #[tokio::test]
    async fn test_context_is_visible_to_inner_service() {
        let sink = MemorySnapshotSink::new();
        let inner = service_fn(|request: Request<Body>| async move {
            let found = request.extensions().get::<RequestContext>().is_some();
            Ok::<_, Infallible>((StatusCode::OK, found.to_string()).into_response())
        });

        let response = pipeline(&sink).handle(inner, request()).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"true");
    }
}
