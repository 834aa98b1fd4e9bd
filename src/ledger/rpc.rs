use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use uuid::Uuid;

use crate::ledger::{LedgerCall, LedgerClient, LedgerError, LedgerEvent, Receipt};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Ledger error code used by the node for reverted calls.
const CODE_EXECUTION_REVERTED: i64 = -32000;

/// JSON-RPC ledger adapter.
///
/// `submit` posts the call; `wait_for_finality` blocks (with the per-call
/// timeout) until the node reports the receipt as final and returns its
/// decoded events.
#[derive(Debug)]
pub struct RpcLedgerClient {
    http: reqwest::Client,
    endpoint: String,
    call_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcLedgerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            call_timeout,
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.call_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Timeout
                } else {
                    LedgerError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "http status {}",
                response.status()
            )));
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(e.to_string()))?;

        if let Some(err) = rpc.error {
            return Err(if err.code == CODE_EXECUTION_REVERTED {
                LedgerError::Reverted(err.message)
            } else {
                LedgerError::Rejected(err.message)
            });
        }

        rpc.result
            .ok_or_else(|| LedgerError::Decode("response carries neither result nor error".into()))
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn submit(&self, call: &LedgerCall) -> Result<Receipt, LedgerError> {
        let params = json!([{
            "target": call.target,
            "function": call.function,
            "args": call.args,
            "value": call.value_attached.to_string(),
        }]);

        let result = self.request("ledger_submit", params).await?;
        serde_json::from_value(result).map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn wait_for_finality(&self, receipt: &Receipt) -> Result<Vec<LedgerEvent>, LedgerError> {
        let result = self
            .request("ledger_waitForFinality", json!([receipt.id]))
            .await?;
        serde_json::from_value(result).map_err(|e| LedgerError::Decode(e.to_string()))
    }
}
