use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use crate::error::{EngineError, Result};
use crate::ledger::{AssetAmount, Confirmation};
use crate::ledger::retry::RetryCoordinator;
use crate::ops::{OperationRegistry, OutputAmount, PlannedOutput, check_schema};
use crate::recipe::graph::RecipeGraph;
use crate::recipe::{Recipe, RecipeNode};
use crate::runtime::balance::InternalBalanceStore;
use crate::runtime::record::{BatchRecord, BatchStatus, BatchStore};

/// Result of a completed batch: the terminal record plus the credited
/// outputs of every terminal node, keyed by node id.
#[derive(Debug)]
pub struct BatchOutcome {
    pub record: BatchRecord,
    pub outputs: HashMap<String, Vec<AssetAmount>>,
}

/// Walks a validated recipe for one user as a single logical batch.
///
/// Nodes run strictly in topological order; a node never starts before its
/// dependencies are fully applied. The applied prefix is durably recorded
/// after every node and never rolled back on a later failure.
#[derive(Debug)]
pub struct BatchExecutor {
    registry: Arc<OperationRegistry>,
    balances: Arc<InternalBalanceStore>,
    retry: Arc<RetryCoordinator>,
    store: Arc<dyn BatchStore>,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
}

impl BatchExecutor {
    pub fn new(
        registry: Arc<OperationRegistry>,
        balances: Arc<InternalBalanceStore>,
        retry: Arc<RetryCoordinator>,
        store: Arc<dyn BatchStore>,
    ) -> Self {
        Self {
            registry,
            balances,
            retry,
            store,
            cancel_flags: DashMap::new(),
        }
    }

    /// Execute a freshly submitted recipe. Validation happens before the
    /// record is opened, so a rejected recipe leaves no trace anywhere.
    pub async fn execute(&self, recipe: Recipe) -> Result<BatchOutcome> {
        let graph = RecipeGraph::build(&recipe, &self.registry, &self.balances.view())?;

        // The flag goes up before the record is persisted, so a caller can
        // withdraw a batch that has not reached the ledger yet.
        let recipe_id = recipe.recipe_id.clone();
        let flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(recipe_id.clone(), flag.clone());

        let mut record = BatchRecord::open(&recipe);
        let walked = match self.store.put(&record).await {
            Ok(()) => {
                info!(recipe_id = %recipe_id, nodes = recipe.nodes.len(), "batch opened");
                self.walk(&graph, &mut record, Some(&flag)).await
            }
            Err(e) => Err(e),
        };
        self.cancel_flags.remove(&recipe_id);

        self.finish(record, walked).await
    }

    /// Request cancellation of an in-flight batch. Honored only while no
    /// ledger call has been submitted; afterwards the call may already be
    /// irrevocably accepted, so the batch runs to its outcome.
    pub fn cancel(&self, recipe_id: &str) -> bool {
        match self.cancel_flags.get(recipe_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Continue a partially applied record from its un-applied suffix,
    /// against the current balance state. Used by the recovery tool.
    pub(crate) async fn resume(&self, mut record: BatchRecord) -> Result<BatchOutcome> {
        let recipe = record.recipe.clone();
        let graph = RecipeGraph::build(&recipe, &self.registry, &self.balances.view())?;
        info!(
            recipe_id = %record.recipe_id,
            applied = record.applied_node_ids.len(),
            "resuming batch"
        );
        let walked = self.walk(&graph, &mut record, None).await;
        self.finish(record, walked).await
    }

    async fn walk(
        &self,
        graph: &RecipeGraph<'_>,
        record: &mut BatchRecord,
        cancel: Option<&Arc<AtomicBool>>,
    ) -> Result<HashMap<String, Vec<AssetAmount>>> {
        let mut submitted_any = !record.applied_node_ids.is_empty();
        let mut outputs = HashMap::new();

        for node in graph.ordered_nodes() {
            if record.is_applied(&node.id) {
                continue;
            }
            if !submitted_any
                && cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
            {
                return Err(EngineError::Cancelled(record.recipe_id.clone()));
            }

            let credited = self.run_node(node, record, &mut submitted_any).await?;
            if node.is_terminal() {
                outputs.insert(node.id.clone(), credited);
            }
            self.store.put(record).await?;
        }

        Ok(outputs)
    }

    /// One node: resolve, schema-check, debit, plan, submit, credit.
    pub(crate) async fn run_node(
        &self,
        node: &RecipeNode,
        record: &mut BatchRecord,
        submitted_any: &mut bool,
    ) -> Result<Vec<AssetAmount>> {
        let op = self.registry.resolve(&node.function_name)?;
        check_schema(&*op, &node.arguments)?;
        let plan = op.plan(&node.user, &node.arguments, &self.balances.view())?;

        self.balances.debit_many(&node.user, &plan.debits)?;

        let mut confirmations: Vec<Confirmation> = Vec::with_capacity(plan.ledger_calls.len());
        for call in &plan.ledger_calls {
            *submitted_any = true;
            match self.retry.call(call).await {
                Ok(confirmation) => confirmations.push(confirmation),
                Err(e) => {
                    // A terminal rejection before anything of this node
                    // confirmed means the ledger did nothing for it; the
                    // debit goes back so the books keep matching reality.
                    // An exhausted budget leaves the outcome unknown, so
                    // the debit stays consumed for the operator to settle.
                    if confirmations.is_empty()
                        && matches!(e, EngineError::LedgerCallRejected { .. })
                    {
                        for debit in &plan.debits {
                            self.balances.credit(&node.user, &debit.asset, debit.amount);
                        }
                    }
                    error!(node = %node.id, op = %node.function_name, error = %e, "node failed");
                    return Err(e);
                }
            }
        }

        let mut credited = Vec::with_capacity(plan.outputs.len());
        for output in &plan.outputs {
            let amount = resolve_output(&node.id, output, &confirmations)?;
            self.balances.credit(&node.user, &output.asset, amount);
            credited.push(AssetAmount {
                asset: output.asset.clone(),
                amount,
            });
        }

        record.mark_applied(
            &node.id,
            confirmations.into_iter().map(|c| c.receipt).collect(),
        );
        info!(node = %node.id, op = %node.function_name, "node applied");
        Ok(credited)
    }

    async fn finish(
        &self,
        mut record: BatchRecord,
        walked: Result<HashMap<String, Vec<AssetAmount>>>,
    ) -> Result<BatchOutcome> {
        match walked {
            Ok(outputs) => {
                record.status = BatchStatus::Applied;
                record.halted_reason = None;
                self.store.put(&record).await?;
                info!(recipe_id = %record.recipe_id, "batch applied");
                Ok(BatchOutcome { record, outputs })
            }
            Err(cause) => {
                let cancelled = matches!(cause, EngineError::Cancelled(_));
                record.status = if record.applied_node_ids.is_empty() {
                    BatchStatus::Failed
                } else {
                    BatchStatus::PartiallyApplied
                };
                record.halted_reason = Some(cause.to_string());
                self.store.put(&record).await?;
                warn!(
                    recipe_id = %record.recipe_id,
                    status = ?record.status,
                    applied = record.applied_node_ids.len(),
                    "batch halted"
                );
                if cancelled {
                    return Err(cause);
                }
                Err(EngineError::BatchHalted {
                    record: Box::new(record),
                    cause: Box::new(cause),
                })
            }
        }
    }
}

fn resolve_output(
    node_id: &str,
    output: &PlannedOutput,
    confirmations: &[Confirmation],
) -> Result<u128> {
    match &output.amount {
        OutputAmount::Exact(amount) => Ok(*amount),
        OutputAmount::FromEvent { call, event, field } => {
            let missing = |what: String| EngineError::LedgerCallRejected {
                function: format!("node {node_id}"),
                source: crate::ledger::LedgerError::Decode(what),
            };
            let confirmation = confirmations
                .get(*call)
                .ok_or_else(|| missing(format!("no confirmation for call {call}")))?;
            let decoded = confirmation
                .event(event)
                .ok_or_else(|| missing(format!("event '{event}' absent from confirmation")))?;
            decoded
                .amount_field(field)
                .ok_or_else(|| missing(format!("event '{event}' lacks amount field '{field}'")))
        }
    }
}
