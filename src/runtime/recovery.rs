use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{EngineError, InvalidRecipeKind, Result};
use crate::recipe::RecipeNode;
use crate::runtime::executor::{BatchExecutor, BatchOutcome};
use crate::runtime::record::{BatchRecord, BatchStatus, BatchStore};

/// Operator-facing repair path over persisted batch records.
///
/// Never guesses compensating actions: it either replays the recorded
/// recipe's un-applied suffix, or executes exactly the remediation nodes
/// the operator supplies.
#[derive(Debug)]
pub struct RecoveryTool {
    executor: Arc<BatchExecutor>,
    store: Arc<dyn BatchStore>,
}

impl RecoveryTool {
    pub(crate) fn new(executor: Arc<BatchExecutor>, store: Arc<dyn BatchStore>) -> Self {
        Self { executor, store }
    }

    pub async fn list_partially_applied(&self) -> Result<Vec<BatchRecord>> {
        self.store
            .list_by_status(BatchStatus::PartiallyApplied)
            .await
    }

    /// Re-run the un-applied suffix against the current balance state.
    /// Replaying an already applied record is a no-op: no ledger calls.
    pub async fn resume(&self, recipe_id: &str) -> Result<BatchOutcome> {
        let record = self.load(recipe_id).await?;
        match record.status {
            BatchStatus::Applied => Ok(BatchOutcome {
                record,
                outputs: HashMap::new(),
            }),
            BatchStatus::PartiallyApplied => self.executor.resume(record).await,
            status => Err(EngineError::NotRecoverable {
                recipe_id: recipe_id.to_string(),
                status,
            }),
        }
    }

    /// Execute operator-supplied remediation nodes in the record's
    /// context, then mark it recovered. The applied prefix stays intact.
    pub async fn compensate(
        &self,
        recipe_id: &str,
        remediation: Vec<RecipeNode>,
    ) -> Result<BatchRecord> {
        let mut record = self.load(recipe_id).await?;
        if record.status != BatchStatus::PartiallyApplied {
            return Err(EngineError::NotRecoverable {
                recipe_id: recipe_id.to_string(),
                status: record.status,
            });
        }
        if remediation.is_empty() {
            return Err(EngineError::ArgumentSchemaMismatch {
                op: "compensate".into(),
                reason: "at least one remediation node required".into(),
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for node in &remediation {
            let collides = !seen.insert(&node.id)
                || record.recipe.nodes.iter().any(|n| n.id == node.id);
            if collides {
                return Err(EngineError::InvalidRecipe {
                    recipe_id: recipe_id.to_string(),
                    kind: InvalidRecipeKind::DuplicateNodeId(node.id.clone()),
                });
            }
        }

        let mut submitted_any = true;
        for node in &remediation {
            match self
                .executor
                .run_node(node, &mut record, &mut submitted_any)
                .await
            {
                Ok(_) => self.store.put(&record).await?,
                Err(e) => {
                    warn!(recipe_id, node = %node.id, error = %e, "remediation node failed");
                    record.halted_reason = Some(e.to_string());
                    self.store.put(&record).await?;
                    return Err(e);
                }
            }
        }

        record.status = BatchStatus::Recovered;
        record.halted_reason = None;
        self.store.put(&record).await?;
        info!(recipe_id, nodes = remediation.len(), "batch recovered");
        Ok(record)
    }

    async fn load(&self, recipe_id: &str) -> Result<BatchRecord> {
        self.store
            .get(recipe_id)
            .await?
            .ok_or_else(|| EngineError::UnknownBatch(recipe_id.to_string()))
    }
}
