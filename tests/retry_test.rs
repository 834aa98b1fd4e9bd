use rezept::error::EngineError;
use rezept::ledger::memory::{InMemoryLedger, ScriptedOutcome};
use rezept::ledger::retry::{Backoff, RetryCoordinator, RetryPolicy};
use rezept::ledger::{Address, LedgerCall, LedgerError};
use std::sync::Arc;
use std::time::Duration;

fn fast_policy(max_attempts: usize) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        backoff: Backoff::Fixed,
        breaker_threshold: 100,
        breaker_cooldown: Duration::from_secs(60),
    }
}

fn call(function: &str) -> LedgerCall {
    LedgerCall {
        target: Address::from("0xTarget"),
        function: function.to_string(),
        args: Vec::new(),
        value_attached: 0,
    }
}

#[tokio::test]
async fn always_timing_out_call_uses_exactly_the_budget() {
    let ledger = Arc::new(InMemoryLedger::new());
    for _ in 0..5 {
        ledger.script("doThing", ScriptedOutcome::Timeout);
    }
    let coordinator = RetryCoordinator::new(ledger.clone(), fast_policy(5));

    let err = coordinator.call(&call("doThing")).await.unwrap_err();
    match err {
        EngineError::RetryBudgetExhausted {
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(attempts, 5);
            assert!(matches!(last_error, LedgerError::Timeout));
        }
        other => panic!("expected RetryBudgetExhausted, got {other:?}"),
    }
    assert_eq!(ledger.submission_count("doThing"), 5);
}

#[tokio::test]
async fn success_on_third_attempt_stops_there() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.script("doThing", ScriptedOutcome::Timeout);
    ledger.script("doThing", ScriptedOutcome::Timeout);
    // Third attempt falls through to the default confirmation.
    let coordinator = RetryCoordinator::new(ledger.clone(), fast_policy(5));

    let confirmation = coordinator
        .call(&call("doThing"))
        .await
        .expect("call failed");
    assert!(confirmation.events.is_empty());
    assert_eq!(ledger.submission_count("doThing"), 3);
}

#[tokio::test]
async fn terminal_rejection_is_not_retried() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.script("doThing", ScriptedOutcome::Revert("slippage".into()));
    let coordinator = RetryCoordinator::new(ledger.clone(), fast_policy(5));

    let err = coordinator.call(&call("doThing")).await.unwrap_err();
    match err {
        EngineError::LedgerCallRejected { source, .. } => {
            assert!(matches!(source, LedgerError::Reverted(_)));
        }
        other => panic!("expected LedgerCallRejected, got {other:?}"),
    }
    assert_eq!(ledger.submission_count("doThing"), 1);
}

#[tokio::test]
async fn transport_failures_are_retryable() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.script("doThing", ScriptedOutcome::Timeout);
    let coordinator = RetryCoordinator::new(ledger.clone(), fast_policy(2));

    coordinator.call(&call("doThing")).await.expect("call failed");
    assert_eq!(ledger.submission_count("doThing"), 2);
}

#[tokio::test]
async fn breaker_opens_after_consecutive_exhaustions() {
    let ledger = Arc::new(InMemoryLedger::new());
    for _ in 0..4 {
        ledger.script("doThing", ScriptedOutcome::Timeout);
    }
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        backoff: Backoff::Fixed,
        breaker_threshold: 2,
        breaker_cooldown: Duration::from_secs(60),
    };
    let coordinator = RetryCoordinator::new(ledger.clone(), policy);

    // Two exhausted budgets trip the breaker.
    assert!(coordinator.call(&call("doThing")).await.is_err());
    assert!(coordinator.call(&call("doThing")).await.is_err());
    assert_eq!(ledger.submission_count("doThing"), 4);

    // Open breaker fails fast: no further submissions.
    let err = coordinator.call(&call("doThing")).await.unwrap_err();
    match err {
        EngineError::RetryBudgetExhausted { attempts, .. } => assert_eq!(attempts, 0),
        other => panic!("expected fast failure, got {other:?}"),
    }
    assert_eq!(ledger.submission_count("doThing"), 4);
}

#[tokio::test]
async fn success_resets_the_breaker_streak() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.script("doThing", ScriptedOutcome::Timeout);
    ledger.script("doThing", ScriptedOutcome::Timeout);
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        backoff: Backoff::Fixed,
        breaker_threshold: 2,
        breaker_cooldown: Duration::from_secs(60),
    };
    let coordinator = RetryCoordinator::new(ledger.clone(), policy);

    // One exhaustion, then a clean call; the streak must restart.
    assert!(coordinator.call(&call("doThing")).await.is_err());
    assert!(coordinator.call(&call("doThing")).await.is_ok());
    assert!(coordinator.call(&call("doThing")).await.is_ok());
}
