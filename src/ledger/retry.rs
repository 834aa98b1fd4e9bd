use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::ledger::{Confirmation, LedgerCall, LedgerClient, LedgerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub backoff: Backoff,
    /// Consecutive exhausted budgets before the breaker opens.
    pub breaker_threshold: usize,
    pub breaker_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff: Backoff::Exponential,
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

/// Wraps every ledger interaction with bounded retry, backoff and a
/// circuit breaker.
///
/// One attempt is submit + wait-for-finality. Retryable failures (timeout,
/// transport) sleep and re-attempt; terminal failures (reverted, rejected,
/// undecodable) propagate immediately and consume no further budget.
#[derive(Debug)]
pub struct RetryCoordinator {
    ledger: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
    consecutive_exhaustions: AtomicUsize,
    open_until: Mutex<Option<Instant>>,
}

impl RetryCoordinator {
    pub fn new(ledger: Arc<dyn LedgerClient>, policy: RetryPolicy) -> Self {
        Self {
            ledger,
            policy,
            consecutive_exhaustions: AtomicUsize::new(0),
            open_until: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn call(&self, call: &LedgerCall) -> Result<Confirmation> {
        self.check_breaker(&call.function)?;

        let mut delay = self.policy.base_delay;
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(call).await {
                Ok(confirmation) => {
                    // Any response from the endpoint, success included,
                    // closes the breaker window.
                    self.consecutive_exhaustions.store(0, Ordering::SeqCst);
                    if attempt > 1 {
                        info!(function = %call.function, attempt, "ledger call recovered");
                    }
                    return Ok(confirmation);
                }
                Err(e) if e.is_retryable() => {
                    warn!(function = %call.function, attempt, error = %e, "retryable ledger failure");
                    last_error = Some(e);
                    if attempt < self.policy.max_attempts {
                        sleep(delay).await;
                        if self.policy.backoff == Backoff::Exponential {
                            delay = delay.saturating_mul(2);
                        }
                    }
                }
                Err(e) => {
                    self.consecutive_exhaustions.store(0, Ordering::SeqCst);
                    return Err(EngineError::LedgerCallRejected {
                        function: call.function.clone(),
                        source: e,
                    });
                }
            }
        }

        self.record_exhaustion();
        Err(EngineError::RetryBudgetExhausted {
            function: call.function.clone(),
            attempts: self.policy.max_attempts,
            last_error: last_error.unwrap_or(LedgerError::Timeout),
        })
    }

    async fn attempt(&self, call: &LedgerCall) -> std::result::Result<Confirmation, LedgerError> {
        let receipt = self.ledger.submit(call).await?;
        let events = self.ledger.wait_for_finality(&receipt).await?;
        Ok(Confirmation { receipt, events })
    }

    /// While open, calls fail fast as exhausted with zero attempts so a dead
    /// endpoint cannot absorb every batch's full retry budget.
    fn check_breaker(&self, function: &str) -> Result<()> {
        let mut open_until = self.open_until.lock().unwrap();
        match *open_until {
            Some(until) if Instant::now() < until => Err(EngineError::RetryBudgetExhausted {
                function: function.to_string(),
                attempts: 0,
                last_error: LedgerError::Transport("circuit breaker open".into()),
            }),
            Some(_) => {
                *open_until = None;
                self.consecutive_exhaustions.store(0, Ordering::SeqCst);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_exhaustion(&self) {
        let streak = self.consecutive_exhaustions.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= self.policy.breaker_threshold {
            let until = Instant::now() + self.policy.breaker_cooldown;
            *self.open_until.lock().unwrap() = Some(until);
            warn!(
                streak,
                cooldown_ms = self.policy.breaker_cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }
}
