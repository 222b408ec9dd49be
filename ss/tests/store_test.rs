//! Integration tests for the session store and its admin binary

use assert_cmd::Command;
use predicates::prelude::*;
use proptest::prelude::*;
use sessionstore::{Cost, LockStore, SessionStore, StoreError, Turn, TurnMode};
use tempfile::TempDir;

fn turn(n: u32, input: u64, output: u64, usd: f64) -> Turn {
    Turn {
        turn_number: n,
        prompt: format!("prompt number {}", n),
        mode: TurnMode::SingleCall,
        response: Some(format!("response {}", n)),
        expansion: None,
        perspectives: None,
        synthesis: None,
        total_cost: Cost::new(input, output, usd),
        elapsed_seconds: 1.0,
        timestamp: sessionstore::now_ms(),
    }
}

// =============================================================================
// Store invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_total_cost_is_sum_and_turns_contiguous(
        costs in prop::collection::vec((0u64..10_000, 0u64..10_000, 0u32..1_000), 1..8)
    ) {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        let name = store.create().unwrap().session_name;

        for (i, (input, output, cents)) in costs.iter().enumerate() {
            let n = i as u32 + 1;
            store.append_turn(&name, turn(n, *input, *output, *cents as f64 / 100.0)).unwrap();
        }

        let session = store.load(&name).unwrap();
        let numbers: Vec<u32> = session.turns.iter().map(|t| t.turn_number).collect();
        let expected: Vec<u32> = (1..=costs.len() as u32).collect();
        prop_assert_eq!(numbers, expected);

        let input_sum: u64 = costs.iter().map(|c| c.0).sum();
        let usd_sum: f64 = costs.iter().map(|c| c.2 as f64 / 100.0).sum();
        prop_assert_eq!(session.total_cost.input_tokens, input_sum);
        prop_assert!((session.total_cost.usd - usd_sum).abs() < 1e-6);
        prop_assert_eq!(session.next_turn_number(), costs.len() as u32 + 1);
    }

    #[test]
    fn prop_append_rejects_any_non_next_number(existing in 0u32..5, offset in 2u32..6) {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        let name = store.create().unwrap().session_name;
        for n in 1..=existing {
            store.append_turn(&name, turn(n, 1, 1, 0.01)).unwrap();
        }

        let bad = existing + offset;
        let result = store.append_turn(&name, turn(bad, 1, 1, 0.01));
        let is_out_of_order = matches!(result, Err(StoreError::TurnOutOfOrder { .. }));
        prop_assert!(is_out_of_order);
        prop_assert_eq!(store.load(&name).unwrap().turns.len() as u32, existing);
    }
}

#[test]
fn test_many_sessions_get_distinct_names() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::open(temp.path()).unwrap();

    let names: std::collections::HashSet<String> = (0..100).map(|_| store.create().unwrap().session_name).collect();
    assert_eq!(names.len(), 100);
    assert_eq!(store.list().unwrap().len(), 100);
}

#[test]
fn test_lock_and_store_share_directory() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::open(temp.path()).unwrap();
    let name = store.create().unwrap().session_name;

    let locks = LockStore::new(store.dir());
    locks.acquire(&name, "job-1").unwrap();

    // Lock files never show up as sessions
    assert_eq!(store.list().unwrap().len(), 1);
}

// =============================================================================
// sessionstore binary
// =============================================================================

fn bin() -> Command {
    Command::cargo_bin("sessionstore").unwrap()
}

#[test]
fn test_cli_list_empty() {
    let temp = TempDir::new().unwrap();
    bin()
        .args(["--dir", temp.path().to_str().unwrap(), "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions found"));
}

#[test]
fn test_cli_show_rename_delete() {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::open(temp.path()).unwrap();
    store.create_named("amber-falcon").unwrap();
    store.append_turn("amber-falcon", turn(1, 10, 20, 0.5)).unwrap();
    let dir = temp.path().to_str().unwrap();

    bin()
        .args(["--dir", dir, "show", "amber-falcon"])
        .assert()
        .success()
        .stdout(predicate::str::contains("prompt number 1"));

    bin()
        .args(["--dir", dir, "rename", "amber-falcon", "market-study"])
        .assert()
        .success();
    assert!(store.exists("market-study"));

    bin()
        .args(["--dir", dir, "delete", "market-study"])
        .assert()
        .success();
    assert!(!store.exists("market-study"));
}

#[test]
fn test_cli_show_missing_fails() {
    let temp = TempDir::new().unwrap();
    bin()
        .args(["--dir", temp.path().to_str().unwrap(), "show", "nobody-here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Session not found"));
}
