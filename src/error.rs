use crate::ledger::{Address, Asset, LedgerError};
use crate::runtime::record::{BatchRecord, BatchStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine-wide error taxonomy.
///
/// Validation errors (`InvalidRecipe`, `UnknownOperation`,
/// `ArgumentSchemaMismatch`) are raised before any ledger interaction.
/// Execution errors after the first successful ledger call are never rolled
/// back automatically; the batch halts and the durable record is handed to
/// the operator instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid recipe '{recipe_id}': {kind}")]
    InvalidRecipe {
        recipe_id: String,
        kind: InvalidRecipeKind,
    },

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("operation '{op}' arguments do not match its schema: {reason}")]
    ArgumentSchemaMismatch { op: String, reason: String },

    #[error("insufficient balance for {user}: {asset} holds {available}, debit of {requested} refused")]
    InsufficientBalance {
        user: Address,
        asset: Asset,
        available: u128,
        requested: u128,
    },

    /// Terminal ledger rejection (revert, argument refusal). Never retried.
    #[error("ledger rejected '{function}': {source}")]
    LedgerCallRejected {
        function: String,
        source: LedgerError,
    },

    /// A retryable failure survived the whole retry budget.
    #[error("retry budget exhausted after {attempts} attempt(s) on '{function}': {last_error}")]
    RetryBudgetExhausted {
        function: String,
        attempts: usize,
        last_error: LedgerError,
    },

    /// The batch stopped mid-walk; the applied prefix stays committed and
    /// the carried record shows exactly which nodes applied.
    #[error("batch '{}' halted with {} node(s) applied: {}", .record.recipe_id, .record.applied_node_ids.len(), .cause)]
    BatchHalted {
        record: Box<BatchRecord>,
        cause: Box<EngineError>,
    },

    #[error("batch '{0}' cancelled before any ledger call")]
    Cancelled(String),

    #[error("no batch record for recipe '{0}'")]
    UnknownBatch(String),

    #[error("batch '{recipe_id}' is {status:?}; recovery only acts on partially applied records")]
    NotRecoverable {
        recipe_id: String,
        status: BatchStatus,
    },

    #[error("state storage failure: {0}")]
    Storage(String),
}

/// Structural defects found by `RecipeGraph` validation.
#[derive(Debug, Error)]
pub enum InvalidRecipeKind {
    #[error("recipe has no nodes")]
    Empty,

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("node '{node}' references missing node '{missing}'")]
    DanglingReference { node: String, missing: String },

    #[error("node '{0}': has_next disagrees with next_ids")]
    InconsistentChaining(String),

    #[error("cycle through node '{0}'")]
    Cycle(String),

    #[error("node '{node}' names unknown operation '{op}'")]
    UnknownOperation { node: String, op: String },

    #[error("node '{node}' consumes {asset} which no ancestor produces")]
    UnsatisfiableAsset { node: String, asset: Asset },
}
