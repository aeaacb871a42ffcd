//! Message-exception correlation
//!
//! Business code often decides what to tell the user before it has built the
//! failure that ends the request. It stages the message in the request's
//! [`MessageLog`], receives a [`CorrelationId`], and attaches that id to the
//! exception it raises. The error logger later resolves the id to merge the
//! message into the persisted snapshot.
//!
//! The log is owned by one request's context and dropped with it, so one
//! user's staged message can never attach to another user's failure.

use crate::common::Indicator;
use crate::exception::AppException;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

mod context;

pub use context::RequestContext;

/// Opaque token linking a staged message to the exception carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A user-facing message prepared ahead of the exception that follows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedMessage {
    pub correlation_id: CorrelationId,
    pub message: String,
    pub title: Option<String>,
    pub indicator: Indicator,
}

/// Request-scoped, ordered store of staged messages.
///
/// Entries are keyed by correlation id and remember their staging order.
/// [`resolve`](MessageLog::resolve) is one-shot, which keeps a message from
/// leaking into a later unrelated failure and bounds the log's size.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: DashMap<CorrelationId, (u64, StagedMessage)>,
    next_seq: AtomicU64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(
        &self,
        message: impl Into<String>,
        title: Option<String>,
        indicator: Indicator,
    ) -> CorrelationId {
        let correlation_id = CorrelationId::new();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let staged = StagedMessage {
            correlation_id,
            message: message.into(),
            title,
            indicator,
        };
        self.entries.insert(correlation_id, (seq, staged));
        correlation_id
    }

    /// Looks up and removes the entry. A second call for the same id
    /// returns `None`.
    pub fn resolve(&self, correlation_id: &CorrelationId) -> Option<StagedMessage> {
        self.entries
            .remove(correlation_id)
            .map(|(_, (_, staged))| staged)
    }

    /// Unresolved entries in staging order.
    pub fn pending(&self) -> Vec<StagedMessage> {
        let mut entries: Vec<(u64, StagedMessage)> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, staged)| staged).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry and returns how many were still unlinked.
    pub fn clear(&self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }
}

/// Copies a correlation id onto an exception.
pub fn attach(exception: AppException, correlation_id: CorrelationId) -> AppException {
    exception.attach(correlation_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_returns_unique_ids() {
        let log = MessageLog::new();
        let a = log.stage("first", None, Indicator::Info);
        let b = log.stage("second", None, Indicator::Info);
        assert_ne!(a, b);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_resolve_is_one_shot() {
        let log = MessageLog::new();
        let id = log.stage("Quantity must be greater than 0.", Some("Invalid".into()), Indicator::Red);

        let staged = log.resolve(&id).unwrap();
        assert_eq!(staged.message, "Quantity must be greater than 0.");
        assert_eq!(staged.title.as_deref(), Some("Invalid"));
        assert!(log.resolve(&id).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_pending_preserves_staging_order() {
        let log = MessageLog::new();
        for i in 0..5 {
            log.stage(format!("message {i}"), None, Indicator::Blue);
        }
        let messages: Vec<String> = log.pending().into_iter().map(|m| m.message).collect();
        assert_eq!(
            messages,
            vec!["message 0", "message 1", "message 2", "message 3", "message 4"]
        );
    }

    #[test]
    fn test_attach_copies_id_onto_exception() {
        let log = MessageLog::new();
        let id = log.stage("stock is locked", None, Indicator::Red);
        let exception = attach(AppException::conflict("stock is locked"), id);
        assert_eq!(exception.correlation_id(), Some(id));
    }

    #[test]
    fn test_clear_reports_unlinked_entries() {
        let log = MessageLog::new();
        log.stage("saved", None, Indicator::Green);
        assert_eq!(log.clear(), 1);
        assert!(log.pending().is_empty());
    }

    #[test]
    fn test_correlation_id_parses_its_display() {
        let id = CorrelationId::new();
        assert_eq!(id.to_string().parse::<CorrelationId>().unwrap(), id);
    }
}
