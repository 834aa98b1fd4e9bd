use dashmap::DashMap;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::ledger::{Address, Asset, AssetAmount, LedgerCall, parse_amount};
use crate::runtime::balance::BalanceView;

pub mod builtin;

/// Positional argument schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    /// Token or contract address.
    Address,
    /// Non-negative integer, as JSON integer or base-10 string.
    Amount,
    /// Ordered list of asset addresses.
    Path,
    /// List of amounts, e.g. basis-point weights.
    AmountList,
    Bool,
    /// Free-form label, e.g. a remainder policy.
    Label,
}

impl ArgSpec {
    fn matches(&self, v: &Value) -> bool {
        match self {
            ArgSpec::Address => v.as_str().is_some_and(|s| !s.is_empty()),
            ArgSpec::Amount => parse_amount(v).is_some(),
            ArgSpec::Path => v
                .as_array()
                .is_some_and(|a| !a.is_empty() && a.iter().all(|e| e.as_str().is_some())),
            ArgSpec::AmountList => v
                .as_array()
                .is_some_and(|a| a.iter().all(|e| parse_amount(e).is_some())),
            // The original system passes booleans as 'true'/'false' strings.
            ArgSpec::Bool => match v {
                Value::Bool(_) => true,
                Value::String(s) => s == "true" || s == "false",
                _ => false,
            },
            ArgSpec::Label => v.as_str().is_some(),
        }
    }
}

/// Assets a node draws from and feeds into the internal balance store,
/// derived from its arguments. Drives static satisfiability checking.
#[derive(Debug, Clone, Default)]
pub struct AssetContract {
    pub consumes: Vec<Asset>,
    pub produces: Vec<Asset>,
}

/// How a planned output's realized amount is determined.
#[derive(Debug, Clone)]
pub enum OutputAmount {
    /// Known at planning time.
    Exact(u128),
    /// Decoded from the named event of the n-th ledger call's confirmation.
    FromEvent {
        call: usize,
        event: String,
        field: String,
    },
}

#[derive(Debug, Clone)]
pub struct PlannedOutput {
    pub asset: Asset,
    pub amount: OutputAmount,
}

/// What a handler wants done. Handlers describe calls instead of making
/// them, so the executor keeps sole control over submission order and
/// retry.
#[derive(Debug, Clone, Default)]
pub struct OpPlan {
    pub debits: Vec<AssetAmount>,
    pub outputs: Vec<PlannedOutput>,
    pub ledger_calls: Vec<LedgerCall>,
}

/// Capability interface for one named operation.
pub trait Operation: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn schema(&self) -> &'static [ArgSpec];

    /// Arg-derived asset contract, used by graph validation.
    fn contract(&self, args: &[Value]) -> Result<AssetContract>;

    /// Plan the node for `user`: debits, planned outputs, ledger calls.
    fn plan(&self, user: &Address, args: &[Value], view: &BalanceView<'_>) -> Result<OpPlan>;
}

/// String-keyed dynamic dispatch over registered operations.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    ops: DashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, op: Arc<dyn Operation>) {
        self.ops.insert(op.name().to_string(), op);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.ops.get(name).map(|e| e.value().clone())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Operation>> {
        self.get(name)
            .ok_or_else(|| EngineError::UnknownOperation(name.to_string()))
    }
}

/// Arity and per-position type check against the operation's schema.
pub fn check_schema(op: &dyn Operation, args: &[Value]) -> Result<()> {
    let schema = op.schema();
    if args.len() != schema.len() {
        return Err(EngineError::ArgumentSchemaMismatch {
            op: op.name().to_string(),
            reason: format!("expected {} argument(s), got {}", schema.len(), args.len()),
        });
    }
    for (i, (spec, value)) in schema.iter().zip(args).enumerate() {
        if !spec.matches(value) {
            return Err(EngineError::ArgumentSchemaMismatch {
                op: op.name().to_string(),
                reason: format!("argument {i} is not a valid {spec:?}"),
            });
        }
    }
    Ok(())
}

pub(crate) fn mismatch(op: &str, reason: impl Into<String>) -> EngineError {
    EngineError::ArgumentSchemaMismatch {
        op: op.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn addr_arg(op: &str, args: &[Value], i: usize) -> Result<Address> {
    args.get(i)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(Address::from)
        .ok_or_else(|| mismatch(op, format!("argument {i} is not an address")))
}

pub(crate) fn amount_arg(op: &str, args: &[Value], i: usize) -> Result<u128> {
    args.get(i)
        .and_then(parse_amount)
        .ok_or_else(|| mismatch(op, format!("argument {i} is not an amount")))
}

pub(crate) fn path_arg(op: &str, args: &[Value], i: usize) -> Result<Vec<Asset>> {
    let raw = args
        .get(i)
        .and_then(|v| v.as_array())
        .ok_or_else(|| mismatch(op, format!("argument {i} is not an asset path")))?;
    let mut path = Vec::with_capacity(raw.len());
    for entry in raw {
        let s = entry
            .as_str()
            .ok_or_else(|| mismatch(op, format!("argument {i} is not an asset path")))?;
        path.push(Address::from(s));
    }
    if path.is_empty() {
        return Err(mismatch(op, format!("argument {i} is an empty asset path")));
    }
    Ok(path)
}

pub(crate) fn amounts_arg(op: &str, args: &[Value], i: usize) -> Result<Vec<u128>> {
    let raw = args
        .get(i)
        .and_then(|v| v.as_array())
        .ok_or_else(|| mismatch(op, format!("argument {i} is not an amount list")))?;
    raw.iter()
        .map(|v| parse_amount(v).ok_or_else(|| mismatch(op, format!("argument {i} holds a non-amount entry"))))
        .collect()
}

pub(crate) fn bool_arg(op: &str, args: &[Value], i: usize) -> Result<bool> {
    match args.get(i) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s == "true" => Ok(true),
        Some(Value::String(s)) if s == "false" => Ok(false),
        _ => Err(mismatch(op, format!("argument {i} is not a boolean"))),
    }
}

pub(crate) fn label_arg(op: &str, args: &[Value], i: usize) -> Result<String> {
    args.get(i)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| mismatch(op, format!("argument {i} is not a label")))
}
