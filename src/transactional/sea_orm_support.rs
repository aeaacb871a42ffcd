use super::{Transaction, TransactionManager, TransactionOptions};
use crate::error::FaultlineError;
use async_trait::async_trait;
use sea_orm::{AccessMode, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::any::Any;
use std::sync::Arc;

/// A SeaORM transaction implementation that wraps `sea_orm::DatabaseTransaction`.
/// The inner transaction is an Option because SeaORM's commit/rollback consume it.
pub struct SeaOrmTransaction {
    pub inner: Option<DatabaseTransaction>,
    read_only: bool,
}

#[async_trait]
impl Transaction for SeaOrmTransaction {
    async fn commit(&mut self) -> Result<(), FaultlineError> {
        tracing::debug!("SeaOrmTransaction: Committing transaction.");
        match self.inner.take() {
            Some(inner) => inner
                .commit()
                .await
                .map_err(|e| FaultlineError::TransactionCommit(e.to_string())),
            None => Err(FaultlineError::TransactionFinalized),
        }
    }

    async fn rollback(&mut self) -> Result<(), FaultlineError> {
        tracing::debug!("SeaOrmTransaction: Rolling back transaction.");
        match self.inner.take() {
            Some(inner) => inner
                .rollback()
                .await
                .map_err(|e| FaultlineError::TransactionRollback(e.to_string())),
            // Already finalized; nothing left to undo.
            None => Ok(()),
        }
    }

    fn has_writes(&self) -> bool {
        self.inner.is_some() && !self.read_only
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Clone)]
pub struct SeaOrmTransactionManager {
    conn: Arc<DatabaseConnection>,
}

impl SeaOrmTransactionManager {
    pub fn new(conn: Arc<DatabaseConnection>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TransactionManager for SeaOrmTransactionManager {
    async fn begin(
        &self,
        options: TransactionOptions,
    ) -> Result<Box<dyn Transaction>, FaultlineError> {
        let access_mode = options.read_only.then_some(AccessMode::ReadOnly);
        let db_tx = self
            .conn
            .begin_with_config(None, access_mode)
            .await
            .map_err(|e| FaultlineError::TransactionBegin(e.to_string()))?;

        Ok(Box::new(SeaOrmTransaction {
            inner: Some(db_tx),
            read_only: options.read_only,
        }))
    }
}
