use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod retry;
pub mod rpc;

/// On-ledger account or contract address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Assets are identified by their token contract address.
pub type Asset = Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset: Asset,
    pub amount: u128,
}

/// Amounts travel through JSON as integers or base-10 strings; wei-scale
/// values do not fit a JSON number reliably, so strings are canonical.
pub fn parse_amount(v: &Value) -> Option<u128> {
    match v {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn amount_value(amount: u128) -> Value {
    Value::String(amount.to_string())
}

/// One call submitted to the external ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerCall {
    pub target: Address,
    pub function: String,
    pub args: Vec<Value>,
    #[serde(default)]
    pub value_attached: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub tx_hash: String,
}

/// A decoded event emitted by a finalized call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub name: String,
    pub fields: serde_json::Map<String, Value>,
}

impl LedgerEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_amount(mut self, field: &str, amount: u128) -> Self {
        self.fields
            .insert(field.to_string(), amount_value(amount));
        self
    }

    pub fn amount_field(&self, field: &str) -> Option<u128> {
        self.fields.get(field).and_then(parse_amount)
    }
}

/// A finalized call: the receipt plus every event it emitted.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub receipt: Receipt,
    pub events: Vec<LedgerEvent>,
}

impl Confirmation {
    pub fn event(&self, name: &str) -> Option<&LedgerEvent> {
        self.events.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("call timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("call reverted: {0}")]
    Reverted(String),

    #[error("call rejected: {0}")]
    Rejected(String),

    #[error("undecodable ledger response: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Timeouts and transport failures may resolve on a later attempt.
    /// Reverts, rejections and decode failures are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Timeout | LedgerError::Transport(_))
    }
}

/// Adapter to the external ledger. Submission and finality are separate
/// because finality can lag submission by seconds to minutes.
#[async_trait]
pub trait LedgerClient: Send + Sync + fmt::Debug {
    async fn submit(&self, call: &LedgerCall) -> Result<Receipt, LedgerError>;

    async fn wait_for_finality(&self, receipt: &Receipt) -> Result<Vec<LedgerEvent>, LedgerError>;
}
