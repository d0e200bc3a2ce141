//! End-to-end scenarios: each test drives a full transaction through
//! `Scheduler::run_transaction` against small WAT fixtures standing in for
//! a coordination script, a UTXO contract, and a token-mint contract.

use starstream_config::HostConfig;
use starstream_core::HostError;
use starstream_host::{Scheduler, TransactionOutcome};
use starstream_universe::Universe;
use starstream_wasm::{new_engine, ContractCodeRegistry};
use std::sync::Arc;

fn registry() -> Arc<ContractCodeRegistry> {
    Arc::new(ContractCodeRegistry::new(new_engine().unwrap()))
}

/// A token-mint contract: mint echoes the requested id with amount 1, burn
/// echoes the id back unchanged.
fn token_module() -> Vec<u8> {
    wat::parse_str(
        r#"
        (module
          (func (export "starstream_mint_nft") (param i64) (result i64 i64)
            (local.get 0) (i64.const 1))
          (func (export "starstream_burn_nft") (param i64 i64) (result i64)
            (local.get 0)))
        "#,
    )
    .unwrap()
}

/// A `StarNftMint`-shaped contract: tracks `supply` in its own linear
/// memory (word at address 0), incrementing it on every mint and trapping
/// once `max_supply` is reached, whether that mint is the first of three in
/// one coordination call or the first of a later transaction entirely.
fn bounded_token_module(max_supply: i32) -> Vec<u8> {
    let text = format!(
        r#"
        (module
          (memory (export "memory") 1)
          (func (export "starstream_mint_nft") (param i64) (result i64 i64)
            (local $supply i32)
            (local.set $supply (i32.load (i32.const 0)))
            (if (i32.ge_s (local.get $supply) (i32.const {max_supply}))
              (then unreachable))
            (i32.store (i32.const 0) (i32.add (local.get $supply) (i32.const 1)))
            (local.get 0)
            (i64.const 1))
          (func (export "starstream_burn_nft") (param i64 i64) (result i64)
            (local.get 0)))
        "#
    );
    wat::parse_str(&text).unwrap()
}

/// A p2pkh-shaped UTXO: on creation, mints one NFT token from `token_hex`
/// naming the requested id, then yields idly so it stays alive. Its
/// `starstream_consume_done` export just returns a constant, handing its
/// attached tokens back to the coordination as intermediates.
fn p2pkh_module(token_hex: &str) -> Vec<u8> {
    let text = format!(
        r#"
        (module
          (import "starstream_token:{token_hex}" "starstream_mint_nft"
            (func $mint (param i64) (result i64 i64)))
          (import "starstream_utxo_env" "starstream_yield"
            (func $yield (param i32 i32 i32 i32 i32 i32)))
          (memory (export "memory") 1)
          (func (export "starstream_new_main") (param i64)
            (call $mint (local.get 0))
            (drop) (drop)
            (call $yield (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))
          (func (export "starstream_consume_done") (result i64) (i64.const 1)))
        "#
    );
    wat::parse_str(&text).unwrap()
}

/// A UTXO that misbehaves by importing a coordination-only operation
/// (scenario 5, context violation).
fn context_violating_utxo_module() -> Vec<u8> {
    let zero_id = "0".repeat(64);
    let text = format!(
        r#"
        (module
          (import "starstream_utxo:{zero_id}" "starstream_new_other" (func $bad (result i64)))
          (memory (export "memory") 1)
          (func (export "starstream_new_main") (result i64) (call $bad)))
        "#
    );
    wat::parse_str(&text).unwrap()
}

/// An oracle-shaped UTXO: yields idly on creation, then on resume raises
/// the reserved `"effect:auth"` suspension and returns once it is resolved.
fn oracle_utxo_module() -> Vec<u8> {
    wat::parse_str(
        r#"
        (module
          (import "starstream_utxo_env" "starstream_yield"
            (func $yield (param i32 i32 i32 i32 i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "effect:auth")
          (func (export "starstream_new_main")
            (call $yield (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0))
            (call $yield (i32.const 0) (i32.const 11) (i32.const 0) (i32.const 0) (i32.const 20) (i32.const 8))))
        "#,
    )
    .unwrap()
}

fn coordination_calling_new(utxo_hex: &str) -> Vec<u8> {
    let text = format!(
        r#"
        (module
          (import "starstream_utxo:{utxo_hex}" "starstream_new_main" (func $new (param i64) (result i64)))
          (func (export "run") (param i64) (result i64) (call $new (local.get 0))))
        "#
    );
    wat::parse_str(&text).unwrap()
}

/// Calls `starstream_new_main` `count` times within a single `run` export,
/// one requested id per parameter — a single coordination call performing
/// several mint round-trips against the same persistent token-mint
/// contract, rather than `count` separate transactions.
fn coordination_mint_sequence(utxo_hex: &str, count: usize) -> Vec<u8> {
    let params = (0..count).map(|i| format!("(param $p{i} i64)")).collect::<Vec<_>>().join(" ");
    let calls: Vec<String> = (0..count)
        .map(|i| {
            let call = format!("(call $new (local.get $p{i}))");
            if i + 1 == count {
                call
            } else {
                format!("{call} (drop)")
            }
        })
        .collect();
    let text = format!(
        r#"
        (module
          (import "starstream_utxo:{utxo_hex}" "starstream_new_main" (func $new (param i64) (result i64)))
          (func (export "run") {params} (result i64)
            {calls}))
        "#,
        calls = calls.join("\n            "),
    );
    wat::parse_str(&text).unwrap()
}

fn coordination_create_then_consume(utxo_hex: &str) -> Vec<u8> {
    let text = format!(
        r#"
        (module
          (import "starstream_utxo:{utxo_hex}" "starstream_new_main" (func $new (param i64) (result i64)))
          (import "starstream_utxo:{utxo_hex}" "starstream_consume_done" (func $consume (param i64) (result i64)))
          (func (export "run")
            (local $handle i64)
            (local.set $handle (call $new (i64.const 9)))
            (call $consume (local.get $handle))
            (drop)))
        "#
    );
    wat::parse_str(&text).unwrap()
}

fn coordination_create_consume_and_remint(utxo_hex: &str) -> Vec<u8> {
    let text = format!(
        r#"
        (module
          (import "starstream_utxo:{utxo_hex}" "starstream_new_main" (func $new (param i64) (result i64)))
          (import "starstream_utxo:{utxo_hex}" "starstream_consume_done" (func $consume (param i64) (result i64)))
          (func (export "run") (result i64)
            (local $first i64)
            (local.set $first (call $new (i64.const 9)))
            (call $consume (local.get $first))
            (drop)
            (call $new (i64.const 9))))
        "#
    );
    wat::parse_str(&text).unwrap()
}

fn coordination_calling_bad_utxo(utxo_hex: &str) -> Vec<u8> {
    let text = format!(
        r#"
        (module
          (import "starstream_utxo:{utxo_hex}" "starstream_new_main" (func $new (result i64)))
          (func (export "run") (result i64) (call $new)))
        "#
    );
    wat::parse_str(&text).unwrap()
}

fn coordination_oracle(utxo_hex: &str, install_handler: bool) -> Vec<u8> {
    let handler_call = if install_handler {
        "(call $handle (local.get $handle) (i64.const 42))"
    } else {
        ""
    };
    let handler_import = if install_handler {
        format!(
            r#"(import "starstream_utxo:{utxo_hex}" "starstream_handle_auth" (func $handle (param i64 i64)))"#
        )
    } else {
        String::new()
    };
    let text = format!(
        r#"
        (module
          (import "starstream_utxo:{utxo_hex}" "starstream_new_main" (func $new (result i64)))
          (import "starstream_utxo:{utxo_hex}" "starstream_resume_main" (func $resume (param i64)))
          {handler_import}
          (func (export "run")
            (local $handle i64)
            (local.set $handle (call $new))
            {handler_call}
            (call $resume (local.get $handle))))
        "#
    );
    wat::parse_str(&text).unwrap()
}

#[test]
fn minting_three_nfts_in_one_transaction_produces_distinct_alive_utxos() {
    let registry = registry();
    let token_code = registry.load(bounded_token_module(10)).unwrap();
    let utxo_code = registry.load(p2pkh_module(&token_code.program_id.to_hex())).unwrap();
    let coordination_code = registry
        .load(coordination_mint_sequence(&utxo_code.program_id.to_hex(), 3))
        .unwrap();
    let scheduler = Scheduler::new(registry, HostConfig::default());
    let mut universe = Universe::new();

    scheduler
        .run_transaction(&mut universe, &coordination_code, "run", &[1, 2, 3])
        .unwrap();

    assert_eq!(universe.len(), 3);
    let mut ids: Vec<u64> = universe.iter().map(|(_, utxo)| utxo.tokens[0].id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(universe.iter().all(|(_, utxo)| utxo.is_alive()));
}

#[test]
fn token_mint_supply_persists_into_a_later_transaction() {
    let registry = registry();
    let token_code = registry.load(bounded_token_module(3)).unwrap();
    let utxo_code = registry.load(p2pkh_module(&token_code.program_id.to_hex())).unwrap();
    let coordination_code = registry.load(coordination_calling_new(&utxo_code.program_id.to_hex())).unwrap();
    let scheduler = Scheduler::new(registry, HostConfig::default());
    let mut universe = Universe::new();

    for requested_id in [1i64, 2, 3] {
        scheduler
            .run_transaction(&mut universe, &coordination_code, "run", &[requested_id])
            .unwrap();
    }
    assert_eq!(universe.len(), 3);

    // Supply is already at its cap of 3; a fourth, later transaction's mint
    // traps instead of silently starting back over from zero, proving the
    // mint contract's memory survived across separate `run_transaction`
    // calls rather than being reinstantiated fresh each time.
    let result = scheduler.run_transaction(&mut universe, &coordination_code, "run", &[4]);
    assert!(result.is_err());
    assert_eq!(universe.len(), 3);
}

#[test]
fn consuming_a_utxo_and_re_minting_resolves_the_intermediate() {
    let registry = registry();
    let token_code = registry.load(token_module()).unwrap();
    let utxo_code = registry.load(p2pkh_module(&token_code.program_id.to_hex())).unwrap();
    let coordination_code = registry
        .load(coordination_create_consume_and_remint(&utxo_code.program_id.to_hex()))
        .unwrap();
    let scheduler = Scheduler::new(registry, HostConfig::default());
    let mut universe = Universe::new();

    let receipt = scheduler.run_transaction(&mut universe, &coordination_code, "run", &[]).unwrap();
    assert!(matches!(receipt.outcome, TransactionOutcome::Scalars(_) | TransactionOutcome::Utxo(_)));

    assert_eq!(universe.len(), 1);
    let (_, utxo) = universe.iter().next().unwrap();
    assert!(utxo.is_alive());
    assert_eq!(utxo.tokens.len(), 1);
    assert_eq!(utxo.tokens[0].id, 9);
}

#[test]
fn forgetting_to_re_mint_a_consumed_token_fails_the_transaction() {
    let registry = registry();
    let token_code = registry.load(token_module()).unwrap();
    let utxo_code = registry.load(p2pkh_module(&token_code.program_id.to_hex())).unwrap();
    let coordination_code = registry
        .load(coordination_create_then_consume(&utxo_code.program_id.to_hex()))
        .unwrap();
    let scheduler = Scheduler::new(registry, HostConfig::default());
    let mut universe = Universe::new();

    let result = scheduler.run_transaction(&mut universe, &coordination_code, "run", &[]);
    assert!(matches!(result, Err(HostError::UnresolvedIntermediate { count: 1 })));
    assert!(universe.is_empty());
}

#[test]
fn a_utxo_calling_a_coordination_only_import_traps_and_rolls_back() {
    let registry = registry();
    let utxo_code = registry.load(context_violating_utxo_module()).unwrap();
    let coordination_code = registry
        .load(coordination_calling_bad_utxo(&utxo_code.program_id.to_hex()))
        .unwrap();
    let scheduler = Scheduler::new(registry, HostConfig::default());
    let mut universe = Universe::new();

    let result = scheduler.run_transaction(&mut universe, &coordination_code, "run", &[]);
    assert!(result.is_err());
    assert!(universe.is_empty());
}

#[test]
fn an_unhandled_effect_fails_the_transaction() {
    let registry = registry();
    let utxo_code = registry.load(oracle_utxo_module()).unwrap();
    let coordination_code = registry.load(coordination_oracle(&utxo_code.program_id.to_hex(), false)).unwrap();
    let scheduler = Scheduler::new(registry, HostConfig::default());
    let mut universe = Universe::new();

    let result = scheduler.run_transaction(&mut universe, &coordination_code, "run", &[]);
    assert!(matches!(result, Err(HostError::UnhandledEffect { .. })));
    assert!(universe.is_empty());
}

#[test]
fn a_handled_effect_lets_the_transaction_complete() {
    let registry = registry();
    let utxo_code = registry.load(oracle_utxo_module()).unwrap();
    let coordination_code = registry.load(coordination_oracle(&utxo_code.program_id.to_hex(), true)).unwrap();
    let scheduler = Scheduler::new(registry, HostConfig::default());
    let mut universe = Universe::new();

    let receipt = scheduler.run_transaction(&mut universe, &coordination_code, "run", &[]).unwrap();
    assert!(receipt.log.len() >= 2);
    assert_eq!(universe.len(), 1);
    assert!(universe.iter().next().unwrap().1.is_alive());
}
