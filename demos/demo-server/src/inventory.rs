use async_trait::async_trait;
use faultline::error::FaultlineError;
use faultline::transactional::{Transaction, TransactionManager, TransactionOptions};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Stock levels by item code. Writes only land on commit.
#[derive(Clone, Default)]
pub struct InventoryStore {
    levels: Arc<RwLock<HashMap<String, i64>>>,
}

impl InventoryStore {
    pub fn seeded() -> Self {
        let levels = [("ITEM-0001", 40), ("ITEM-0002", 3)]
            .into_iter()
            .map(|(code, qty)| (code.to_string(), qty))
            .collect();
        Self {
            levels: Arc::new(RwLock::new(levels)),
        }
    }

    pub async fn level(&self, code: &str) -> Option<i64> {
        self.levels.read().await.get(code).copied()
    }
}

pub struct InventoryTransaction {
    store: InventoryStore,
    pending: Vec<(String, i64)>,
    read_only: bool,
}

impl InventoryTransaction {
    pub fn adjust(&mut self, code: &str, delta: i64) -> Result<(), FaultlineError> {
        if self.read_only {
            return Err(FaultlineError::Internal(
                "write attempted in a read-only transaction".to_string(),
            ));
        }
        self.pending.push((code.to_string(), delta));
        Ok(())
    }
}

#[async_trait]
impl Transaction for InventoryTransaction {
    async fn commit(&mut self) -> Result<(), FaultlineError> {
        let mut levels = self.store.levels.write().await;
        for (code, delta) in self.pending.drain(..) {
            *levels.entry(code).or_default() += delta;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), FaultlineError> {
        let discarded = self.pending.len();
        self.pending.clear();
        tracing::info!(discarded, "Inventory adjustments discarded");
        Ok(())
    }

    fn has_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[async_trait]
impl TransactionManager for InventoryStore {
    async fn begin(
        &self,
        options: TransactionOptions,
    ) -> Result<Box<dyn Transaction>, FaultlineError> {
        Ok(Box::new(InventoryTransaction {
            store: self.clone(),
            pending: Vec::new(),
            read_only: options.read_only,
        }))
    }
}
