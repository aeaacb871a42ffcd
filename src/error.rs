use thiserror::Error;

pub type Result<T, E = FaultlineError> = std::result::Result<T, E>;

/// Failures of the pipeline's own collaborators.
///
/// These never reach a client directly: the coordinator either logs them and
/// carries on, or folds them into an `Internal` [`AppException`](crate::exception::AppException).
#[derive(Debug, Error)]
pub enum FaultlineError {
    #[error("Failed to begin transaction: {0}")]
    TransactionBegin(String),

    #[error("Failed to commit transaction: {0}")]
    TransactionCommit(String),

    #[error("Failed to roll back transaction: {0}")]
    TransactionRollback(String),

    #[error("Transaction already finalized")]
    TransactionFinalized,

    #[error("Snapshot write failed: {0}")]
    SnapshotWrite(String),

    #[error("After-request hook `{hook}` failed: {message}")]
    HookFailed { hook: String, message: String },

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidConfig { key: String, value: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaultlineError {
    pub fn hook_failed(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HookFailed {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

#[cfg(feature = "sea-orm-db")]
impl From<sea_orm::DbErr> for FaultlineError {
    fn from(err: sea_orm::DbErr) -> Self {
        FaultlineError::Internal(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for FaultlineError {
    fn from(err: serde_json::Error) -> Self {
        FaultlineError::SnapshotWrite(err.to_string())
    }
}
