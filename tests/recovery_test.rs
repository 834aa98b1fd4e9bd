use rezept::config::AddressBook;
use rezept::error::EngineError;
use rezept::ledger::memory::{InMemoryLedger, ScriptedOutcome, confirm_with};
use rezept::ledger::retry::{Backoff, RetryPolicy};
use rezept::ledger::{Address, LedgerEvent};
use rezept::ops::builtin::register_builtin_operations;
use rezept::recipe::RecipeNode;
use rezept::recipe::builder::RecipeBuilder;
use rezept::runtime::engine::Engine;
use rezept::runtime::record::{BatchStatus, BatchStore, FileBatchStore, InMemoryBatchStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TOKEN_A: &str = "0xA000000000000000000000000000000000000001";
const TOKEN_B: &str = "0xB000000000000000000000000000000000000002";
const USER: &str = "0x8626f6940E2eb28930eFb4CeF49B2d1F2C9C1199";

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        backoff: Backoff::Fixed,
        breaker_threshold: 100,
        breaker_cooldown: Duration::from_secs(60),
    }
}

fn addresses() -> AddressBook {
    AddressBook {
        engine: Address::from("0xE000000000000000000000000000000000000001"),
        router: Address::from("0xR000000000000000000000000000000000000001"),
        perp_router: Address::from("0xP000000000000000000000000000000000000001"),
        ..AddressBook::default()
    }
}

fn engine_with(ledger: Arc<InMemoryLedger>, store: Arc<dyn BatchStore>) -> Engine {
    let engine = Engine::new(ledger, store, fast_policy());
    register_builtin_operations(engine.registry(), &addresses());
    engine
}

fn user() -> Address {
    Address::from(USER)
}

/// add_funds -> swap -> send chain whose swap reverts once.
fn halting_recipe(id: &str) -> rezept::recipe::Recipe {
    RecipeBuilder::new(id, USER)
        .node("n1", "add_funds")
            .arg(TOKEN_A)
            .amount(100)
            .then(&["n2"])
            .build()
        .node("n2", "swap")
            .path(&[TOKEN_A, TOKEN_B])
            .amount(100)
            .amount(90)
            .then(&["n3"])
            .build()
        .node("n3", "send_to_wallet")
            .arg(TOKEN_B)
            .amount(97)
            .build()
        .build()
}

async fn halt_batch(engine: &Engine, ledger: &InMemoryLedger, id: &str) {
    ledger.script("swapTokens", ScriptedOutcome::Revert("pool drained".into()));
    let err = engine.submit_recipe(halting_recipe(id)).await.unwrap_err();
    assert!(matches!(err, EngineError::BatchHalted { .. }));
}

#[tokio::test]
async fn resume_on_applied_record_is_a_noop() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_with(ledger.clone(), Arc::new(InMemoryBatchStore::new()));

    let recipe = RecipeBuilder::new("noop-resume", USER)
        .node("n1", "add_funds")
            .arg(TOKEN_A)
            .amount(100)
            .then(&["n2"])
            .build()
        .node("n2", "send_to_wallet")
            .arg(TOKEN_A)
            .amount(100)
            .build()
        .build();
    engine.submit_recipe(recipe).await.expect("batch halted");
    let submitted = ledger.submissions().len();

    let outcome = engine
        .recovery()
        .resume("noop-resume")
        .await
        .expect("resume failed");
    assert_eq!(outcome.record.status, BatchStatus::Applied);

    // Idempotent: not a single duplicate ledger call.
    assert_eq!(ledger.submissions().len(), submitted);
}

#[tokio::test]
async fn resume_completes_the_unapplied_suffix() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_with(ledger.clone(), Arc::new(InMemoryBatchStore::new()));
    halt_batch(&engine, &ledger, "suffix").await;

    // The revert restored the swap's debit; the suffix can run once the
    // router behaves again.
    assert_eq!(engine.balances().balance_of(&user(), &Address::from(TOKEN_A)), 100);
    ledger.script(
        "swapTokens",
        confirm_with(LedgerEvent::new("Swap").with_amount("amount_out", 97)),
    );

    let outcome = engine
        .recovery()
        .resume("suffix")
        .await
        .expect("resume failed");
    assert_eq!(outcome.record.status, BatchStatus::Applied);
    assert!(outcome.record.is_applied("n2"));
    assert!(outcome.record.is_applied("n3"));

    // The applied prefix was not replayed.
    assert_eq!(ledger.submission_count("addFunds"), 1);
    assert_eq!(engine.balances().balance_of(&user(), &Address::from(TOKEN_B)), 0);
}

#[tokio::test]
async fn compensate_executes_operator_nodes_and_marks_recovered() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_with(ledger.clone(), Arc::new(InMemoryBatchStore::new()));
    halt_batch(&engine, &ledger, "stranded").await;

    // 100 of TOKEN_A is stranded in the engine's books; the operator
    // explicitly sends it back to the user's wallet.
    let remediation = vec![RecipeNode {
        id: "send-back".into(),
        function_name: "send_to_wallet".into(),
        user: user(),
        arguments: vec![json!(TOKEN_A), json!("100")],
        has_next: false,
        next_ids: Vec::new(),
    }];

    let record = engine
        .recovery()
        .compensate("stranded", remediation)
        .await
        .expect("compensation failed");
    assert_eq!(record.status, BatchStatus::Recovered);
    assert!(record.is_applied("send-back"));
    assert!(record.receipts.contains_key("send-back"));
    assert_eq!(engine.balances().balance_of(&user(), &Address::from(TOKEN_A)), 0);
    assert_eq!(ledger.submission_count("sendToWallet"), 1);
}

#[tokio::test]
async fn compensate_requires_remediation_nodes() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_with(ledger.clone(), Arc::new(InMemoryBatchStore::new()));
    halt_batch(&engine, &ledger, "no-nodes").await;

    let err = engine
        .recovery()
        .compensate("no-nodes", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ArgumentSchemaMismatch { .. }));
}

#[tokio::test]
async fn recovery_refuses_terminal_records() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_with(ledger.clone(), Arc::new(InMemoryBatchStore::new()));

    let recipe = RecipeBuilder::new("terminal", USER)
        .node("n1", "add_funds")
            .arg(TOKEN_A)
            .amount(100)
            .then(&["n2"])
            .build()
        .node("n2", "send_to_wallet")
            .arg(TOKEN_A)
            .amount(100)
            .build()
        .build();
    engine.submit_recipe(recipe).await.expect("batch halted");

    let remediation = vec![RecipeNode {
        id: "extra".into(),
        function_name: "send_to_wallet".into(),
        user: user(),
        arguments: vec![json!(TOKEN_A), json!("1")],
        has_next: false,
        next_ids: Vec::new(),
    }];
    let err = engine
        .recovery()
        .compensate("terminal", remediation)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotRecoverable {
            status: BatchStatus::Applied,
            ..
        }
    ));
}

#[tokio::test]
async fn resume_of_unknown_batch_fails() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_with(ledger, Arc::new(InMemoryBatchStore::new()));
    let err = engine.recovery().resume("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownBatch(_)));
}

#[tokio::test]
async fn list_surfaces_partially_applied_records() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_with(ledger.clone(), Arc::new(InMemoryBatchStore::new()));
    halt_batch(&engine, &ledger, "listed").await;

    let records = engine
        .recovery()
        .list_partially_applied()
        .await
        .expect("listing failed");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].recipe_id, "listed");
    assert_eq!(records[0].applied_node_ids, vec!["n1".to_string()]);
    assert!(records[0].halted_reason.is_some());
}

#[tokio::test]
async fn records_survive_a_restart_through_the_file_store() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let ledger = Arc::new(InMemoryLedger::new());
    {
        let store = Arc::new(FileBatchStore::new(dir.path()).expect("store failed"));
        let engine = engine_with(ledger.clone(), store);
        halt_batch(&engine, &ledger, "durable").await;
    }

    // A fresh process: new engine over the same state directory. Balances
    // start empty, so the operator re-funds before resuming.
    let store = Arc::new(FileBatchStore::new(dir.path()).expect("store failed"));
    let engine = engine_with(ledger.clone(), store);

    let records = engine
        .recovery()
        .list_partially_applied()
        .await
        .expect("listing failed");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].recipe_id, "durable");

    engine.balances().credit(&user(), &Address::from(TOKEN_A), 100);
    ledger.script(
        "swapTokens",
        confirm_with(LedgerEvent::new("Swap").with_amount("amount_out", 97)),
    );
    let outcome = engine
        .recovery()
        .resume("durable")
        .await
        .expect("resume failed");
    assert_eq!(outcome.record.status, BatchStatus::Applied);

    let reloaded = engine.batch_status("durable").await.expect("no record");
    assert_eq!(reloaded.status, BatchStatus::Applied);
}
