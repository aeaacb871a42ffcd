//! # Faultline
//!
//! Global exception handling and response generation for axum services.
//!
//! Every failure raised while a request is in flight is caught at one place,
//! classified into an HTTP status, rendered as JSON or an HTML page depending
//! on the client, and paired with the right transaction outcome. Server-side
//! failures are persisted as error snapshots; traces reach the client only in
//! development mode.
//!
//! ## Features
//!
//! - **Exception taxonomy**: typed [`AppException`] kinds with a fixed status table
//! - **Transaction guard**: commit on success, roll back failed writes
//! - **Content negotiation**: JSON envelopes for API clients, branded pages for browsers
//! - **Message correlation**: stage a user message, raise, and find it again in the snapshot
//! - **Redaction**: fail-closed trace visibility driven by configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use faultline::prelude::*;
//!
//! async fn submit_order(ctx: RequestContext) -> Result<StatusCode, AppException> {
//!     Err(ctx.throw(ExceptionKind::Validation, "Quantity must be greater than 0."))
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = FaultPipeline::builder()
//!         .snapshot_sink(Arc::new(TracingSnapshotSink))
//!         .build();
//!
//!     let app: Router = Router::new()
//!         .route("/api/orders", axum::routing::post(submit_order))
//!         .layer(FaultLayer::new(pipeline));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod common;
pub mod config;
pub mod correlation;
pub mod error;
pub mod exception;
pub mod format;
pub mod guard;
pub mod hooks;
pub mod pipeline;
pub mod redaction;
pub mod snapshot;
pub mod transactional;

// Re-export core types
pub use common::{ErrorEnvelope, Indicator};
pub use correlation::{CorrelationId, RequestContext};
pub use error::{FaultlineError, Result};
pub use exception::{AppException, ExceptionKind, Fault, HttpAbort};
pub use pipeline::{FaultLayer, FaultPipeline, FaultService};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use faultline::prelude::*;
/// ```
pub mod prelude {
    pub use crate::common::{ErrorEnvelope, Indicator};
    pub use crate::config::ConfigService;
    pub use crate::correlation::{CorrelationId, MessageLog, RequestContext, attach};
    pub use crate::error::{FaultlineError, Result};
    pub use crate::exception::{AppException, ExceptionKind, Fault, HttpAbort, classify};
    pub use crate::format::{DefaultPageRenderer, PageRenderer, ResponseFormat};
    pub use crate::guard::{Guard, GuardError, GuardResult, HeaderSessionGuard};
    pub use crate::hooks::AfterRequestHook;
    pub use crate::pipeline::{FaultLayer, FaultPipeline, RequestState};
    pub use crate::redaction::{StaticTraceFlags, TraceFlags};
    pub use crate::snapshot::{
        ErrorSnapshot, MemorySnapshotSink, SnapshotSink, TracingSnapshotSink,
    };
    pub use crate::transactional::{
        ActiveTransaction, Transaction, TransactionManager, TransactionOptions,
        get_current_transaction,
    };
    pub use async_trait::async_trait;
    pub use axum::{
        Json, Router,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    pub use std::sync::Arc;
}
