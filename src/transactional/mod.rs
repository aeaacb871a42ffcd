use crate::error::FaultlineError;
use crate::exception::AppException;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{Method, request::Parts},
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

#[cfg(feature = "sea-orm-db")]
mod sea_orm_support;

#[cfg(feature = "sea-orm-db")]
pub use sea_orm_support::{SeaOrmTransaction, SeaOrmTransactionManager};

tokio::task_local! {
    /// Task-local storage for the active transaction.
    ///
    /// Set by the pipeline for the duration of dispatch, so repositories deep
    /// in the call stack can reach the request's transaction without it being
    /// passed through every signature.
    pub static ACTIVE_TRANSACTION: Option<ActiveTransaction>;
}

/// Retrieves the request's transaction from task-local storage.
///
/// Returns `None` outside dispatch or when no transaction manager is
/// configured.
pub fn get_current_transaction() -> Option<ActiveTransaction> {
    ACTIVE_TRANSACTION.try_with(|tx| tx.clone()).unwrap_or(None)
}

/// Whether a request method creates or mutates state.
pub fn is_unsafe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Succeeded,
    Failed,
}

/// What the guard tells the persistence collaborator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Commit,
    Rollback,
    NoOp,
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOutcome::Commit => f.write_str("commit"),
            TransactionOutcome::Rollback => f.write_str("rollback"),
            TransactionOutcome::NoOp => f.write_str("no-op"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Set for safe methods. Backends may open a read-only transaction.
    pub read_only: bool,
}

impl TransactionOptions {
    pub fn for_method(method: &Method) -> Self {
        Self {
            read_only: !is_unsafe_method(method),
        }
    }
}

/// Trait for managing transactions
#[async_trait]
pub trait TransactionManager: Send + Sync + 'static {
    /// Begin a new transaction with options
    async fn begin(
        &self,
        options: TransactionOptions,
    ) -> Result<Box<dyn Transaction>, FaultlineError>;
}

/// A generic transaction abstraction
///
/// A transaction that receives neither `commit` nor `rollback` is released by
/// dropping it; backends are expected to discard its work.
#[async_trait]
pub trait Transaction: Send + Sync + std::any::Any {
    /// Commit the transaction
    async fn commit(&mut self) -> Result<(), FaultlineError>;

    /// Rollback the transaction
    async fn rollback(&mut self) -> Result<(), FaultlineError>;

    /// Whether uncommitted writes are pending.
    fn has_writes(&self) -> bool {
        false
    }

    /// Gets this trait object as a mutable `Any` reference for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Shared handle to the request's transaction.
///
/// One clone lives in the request extensions (and task-local storage) for the
/// handler; the pipeline keeps another to finalize it.
#[derive(Clone)]
pub struct ActiveTransaction(pub Arc<Mutex<Box<dyn Transaction>>>);

impl ActiveTransaction {
    pub fn new(transaction: Box<dyn Transaction>) -> Self {
        Self(Arc::new(Mutex::new(transaction)))
    }

    pub async fn has_writes(&self) -> bool {
        self.0.lock().await.has_writes()
    }
}

impl<S> FromRequestParts<S> for ActiveTransaction
where
    S: Send + Sync,
{
    type Rejection = AppException;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<ActiveTransaction>().cloned().ok_or_else(|| {
            AppException::internal(FaultlineError::Internal(
                "No active transaction for this request".to_string(),
            ))
        })
    }
}

/// Commit/rollback policy for one request.
pub struct TransactionGuard;

impl TransactionGuard {
    /// Succeeded requests commit. Failed unsafe requests roll back. Failed
    /// safe requests only roll back writes that are already open.
    pub fn decide(
        method: &Method,
        outcome: RequestOutcome,
        has_open_writes: bool,
    ) -> TransactionOutcome {
        match outcome {
            RequestOutcome::Succeeded => TransactionOutcome::Commit,
            RequestOutcome::Failed if is_unsafe_method(method) => TransactionOutcome::Rollback,
            RequestOutcome::Failed if has_open_writes => TransactionOutcome::Rollback,
            RequestOutcome::Failed => TransactionOutcome::NoOp,
        }
    }

    /// Issues the decision to the transaction. Exactly one call reaches the
    /// backend for `Commit` and `Rollback`; `NoOp` touches nothing.
    pub async fn apply(
        decision: TransactionOutcome,
        transaction: &ActiveTransaction,
    ) -> Result<(), FaultlineError> {
        let mut tx = transaction.0.lock().await;
        match decision {
            TransactionOutcome::Commit => {
                tracing::debug!("Committing request transaction");
                tx.commit().await
            }
            TransactionOutcome::Rollback => {
                tracing::info!("Rolling back request transaction");
                tx.rollback().await
            }
            TransactionOutcome::NoOp => Ok(()),
        }
    }
}
