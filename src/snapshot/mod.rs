//! Error snapshots
//!
//! Server-side failures (status >= 500) are persisted with the full,
//! unredacted trace and the request they happened in, for operators to review
//! after the fact. Writing a snapshot is best-effort: a broken sink is logged
//! and never affects the response.

use crate::correlation::{CorrelationId, RequestContext};
use crate::error::FaultlineError;
use crate::exception::{AppException, ExceptionKind};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const MASKED: &str = "********";

/// Headers whose values never reach a snapshot.
const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "cookie", "proxy-authorization", "x-api-key"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl RequestMetadata {
    pub fn capture(request: &Request<Body>, request_id: Uuid) -> Self {
        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| {
                let name = name.as_str().to_string();
                let value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                    MASKED.to_string()
                } else {
                    String::from_utf8_lossy(value.as_bytes()).into_owned()
                };
                (name, value)
            })
            .collect();

        Self {
            request_id,
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            headers,
        }
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(header::USER_AGENT.as_str()).map(String::as_str)
    }
}

/// Persisted diagnostic record. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSnapshot {
    pub id: Uuid,
    pub correlation_id: Option<CorrelationId>,
    pub timestamp: DateTime<Utc>,
    pub status_code: u16,
    pub kind: ExceptionKind,
    pub message: String,
    pub title: Option<String>,
    pub traceback: String,
    pub request: RequestMetadata,
    pub acting_user: Option<String>,
}

impl ErrorSnapshot {
    /// Builds a snapshot, merging the correlated staged message if there is
    /// one. The staged message is consumed.
    pub fn build(status: StatusCode, exception: &AppException, ctx: &RequestContext) -> Self {
        let staged = exception
            .correlation_id()
            .and_then(|id| ctx.resolve(&id));

        let (message, title) = match staged {
            Some(staged) => (
                staged.message,
                staged.title.or_else(|| exception.title().map(str::to_string)),
            ),
            None => (
                exception.message().to_string(),
                exception.title().map(str::to_string),
            ),
        };

        Self {
            id: Uuid::new_v4(),
            correlation_id: exception.correlation_id(),
            timestamp: Utc::now(),
            status_code: status.as_u16(),
            kind: exception.kind(),
            message,
            title,
            traceback: exception.traceback(),
            request: ctx.metadata().clone(),
            acting_user: ctx.acting_user().map(str::to_string),
        }
    }
}

/// Append-only store for snapshots. Must accept concurrent appends.
#[async_trait]
pub trait SnapshotSink: Send + Sync + 'static {
    async fn persist(&self, snapshot: ErrorSnapshot) -> Result<(), FaultlineError>;
}

/// In-process sink, mostly for tests and local development.
#[derive(Clone, Default)]
pub struct MemorySnapshotSink {
    snapshots: Arc<RwLock<Vec<ErrorSnapshot>>>,
}

impl MemorySnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshots(&self) -> Vec<ErrorSnapshot> {
        self.snapshots.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

#[async_trait]
impl SnapshotSink for MemorySnapshotSink {
    async fn persist(&self, snapshot: ErrorSnapshot) -> Result<(), FaultlineError> {
        self.snapshots.write().await.push(snapshot);
        Ok(())
    }
}

/// Emits each snapshot as one structured `error` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSnapshotSink;

#[async_trait]
impl SnapshotSink for TracingSnapshotSink {
    async fn persist(&self, snapshot: ErrorSnapshot) -> Result<(), FaultlineError> {
        let payload = serde_json::to_string(&snapshot)?;
        tracing::error!(
            target: "faultline::snapshot",
            snapshot_id = %snapshot.id,
            request_id = %snapshot.request.request_id,
            status = snapshot.status_code,
            kind = %snapshot.kind,
            snapshot = %payload,
            "Error snapshot"
        );
        Ok(())
    }
}

/// Writes snapshots for server-side failures.
#[derive(Clone)]
pub struct ErrorLogger {
    sink: Arc<dyn SnapshotSink>,
}

impl ErrorLogger {
    pub fn new(sink: Arc<dyn SnapshotSink>) -> Self {
        Self { sink }
    }

    /// Persists a snapshot when `status >= 500`. Returns the snapshot id when
    /// one was written. Never fails.
    pub async fn log_if_needed(
        &self,
        status: StatusCode,
        exception: &AppException,
        ctx: &RequestContext,
    ) -> Option<Uuid> {
        if !status.is_server_error() {
            return None;
        }

        let snapshot = ErrorSnapshot::build(status, exception, ctx);
        let id = snapshot.id;
        let persisted = AssertUnwindSafe(self.sink.persist(snapshot)).catch_unwind().await;
        match persisted {
            Ok(Ok(())) => {
                tracing::debug!(snapshot_id = %id, request_id = %ctx.request_id(), "Error snapshot written");
                Some(id)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    error = %e,
                    request_id = %ctx.request_id(),
                    "Failed to persist error snapshot"
                );
                None
            }
            Err(panic) => {
                tracing::error!(
                    panic = %crate::pipeline::panic_message(&panic),
                    request_id = %ctx.request_id(),
                    "Snapshot sink panicked"
                );
                None
            }
        }
    }
}

impl Default for ErrorLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSnapshotSink))
    }
}
