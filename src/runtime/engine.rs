use std::sync::Arc;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::ledger::LedgerClient;
use crate::ledger::retry::{RetryCoordinator, RetryPolicy};
use crate::ops::OperationRegistry;
use crate::ops::builtin::register_builtin_operations;
use crate::recipe::Recipe;
use crate::runtime::balance::InternalBalanceStore;
use crate::runtime::executor::{BatchExecutor, BatchOutcome};
use crate::runtime::record::{BatchRecord, BatchStore, FileBatchStore};
use crate::runtime::recovery::RecoveryTool;

/// Batch submission façade wiring registry, balances, retry and
/// persistence together.
#[derive(Debug)]
pub struct Engine {
    registry: Arc<OperationRegistry>,
    balances: Arc<InternalBalanceStore>,
    store: Arc<dyn BatchStore>,
    executor: Arc<BatchExecutor>,
}

impl Engine {
    /// Bare engine with an empty registry; embedders register their own
    /// operation set.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn BatchStore>,
        policy: RetryPolicy,
    ) -> Self {
        let registry = Arc::new(OperationRegistry::new());
        let balances = Arc::new(InternalBalanceStore::new());
        let retry = Arc::new(RetryCoordinator::new(ledger, policy));
        let executor = Arc::new(BatchExecutor::new(
            registry.clone(),
            balances.clone(),
            retry,
            store.clone(),
        ));
        Self {
            registry,
            balances,
            store,
            executor,
        }
    }

    /// Engine as the binary runs it: file-backed records under the
    /// configured state directory, builtin operations wired against the
    /// network's address table.
    pub fn from_config(config: &Config, ledger: Arc<dyn LedgerClient>) -> Result<Self> {
        let store: Arc<dyn BatchStore> = Arc::new(FileBatchStore::new(&config.state_dir)?);
        let engine = Self::new(ledger, store, config.retry.policy());
        register_builtin_operations(&engine.registry, &config.addresses);
        Ok(engine)
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn balances(&self) -> &InternalBalanceStore {
        &self.balances
    }

    /// Run one recipe as a batch. Returns the full outcome on success, or
    /// `BatchHalted` carrying the durable record on a mid-walk failure.
    pub async fn submit_recipe(&self, recipe: Recipe) -> Result<BatchOutcome> {
        self.executor.execute(recipe).await
    }

    pub async fn batch_status(&self, recipe_id: &str) -> Result<BatchRecord> {
        self.store
            .get(recipe_id)
            .await?
            .ok_or_else(|| EngineError::UnknownBatch(recipe_id.to_string()))
    }

    /// Best effort: honored only before the batch's first ledger call.
    pub fn cancel(&self, recipe_id: &str) -> bool {
        self.executor.cancel(recipe_id)
    }

    pub fn recovery(&self) -> RecoveryTool {
        RecoveryTool::new(self.executor.clone(), self.store.clone())
    }
}
