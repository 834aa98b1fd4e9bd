use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::ledger::{LedgerCall, LedgerClient, LedgerError, LedgerEvent, Receipt};

/// What a scripted call should do when it reaches the ledger.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Confirm(Vec<LedgerEvent>),
    Timeout,
    Revert(String),
    Reject(String),
}

/// Deterministic in-memory ledger.
///
/// Outcomes are scripted per function name and consumed in FIFO order; a
/// function with no remaining script confirms with no events. Every submit
/// attempt is logged, so tests can assert exact attempt counts.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    log: Mutex<Vec<LedgerCall>>,
    finality: Mutex<HashMap<String, Vec<LedgerEvent>>>,
    latency: Mutex<Duration>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome for `function`.
    pub fn script(&self, function: &str, outcome: ScriptedOutcome) {
        self.scripts
            .lock()
            .unwrap()
            .entry(function.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Artificial submission latency, to exercise in-flight windows.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn submissions(&self) -> Vec<LedgerCall> {
        self.log.lock().unwrap().clone()
    }

    pub fn submission_count(&self, function: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.function == function)
            .count()
    }

    fn next_outcome(&self, function: &str) -> ScriptedOutcome {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(function)
            .and_then(|q| q.pop_front())
            .unwrap_or(ScriptedOutcome::Confirm(Vec::new()))
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit(&self, call: &LedgerCall) -> Result<Receipt, LedgerError> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.log.lock().unwrap().push(call.clone());

        match self.next_outcome(&call.function) {
            ScriptedOutcome::Confirm(events) => {
                let id = Uuid::new_v4().to_string();
                let receipt = Receipt {
                    tx_hash: format!("0x{}", id.replace('-', "")),
                    id: id.clone(),
                };
                self.finality.lock().unwrap().insert(id, events);
                Ok(receipt)
            }
            ScriptedOutcome::Timeout => Err(LedgerError::Timeout),
            ScriptedOutcome::Revert(reason) => Err(LedgerError::Reverted(reason)),
            ScriptedOutcome::Reject(reason) => Err(LedgerError::Rejected(reason)),
        }
    }

    async fn wait_for_finality(&self, receipt: &Receipt) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.finality
            .lock()
            .unwrap()
            .get(&receipt.id)
            .cloned()
            .ok_or_else(|| LedgerError::Rejected(format!("unknown receipt {}", receipt.id)))
    }
}

/// Convenience for scripting a confirmation that emits one event.
pub fn confirm_with(event: LedgerEvent) -> ScriptedOutcome {
    ScriptedOutcome::Confirm(vec![event])
}
