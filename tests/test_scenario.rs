mod common;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use vault_flow::math::{WAD, value_of_shares};
use vault_flow::scenario::{self, Scenario};
use vault_flow::validate;

use common::*;

// ── Helpers ──────────────────────────────────────────────────────────

fn lifecycle() -> serde_json::Value {
    json!({
        "name": "lifecycle",
        "admin": "admin",
        "assets": [{ "symbol": "USDC", "decimals": 6, "price": "1" }],
        "groups": [["USDC"]],
        "strategies": [
            { "name": "aave", "group": 0 },
            { "name": "compound", "group": 0 }
        ],
        "vaults": [{
            "id": "stable",
            "owner": "curator",
            "strategies": ["aave", "compound"],
            "allocation": [7000, 3000],
            "guards": [{ "deposit_limit": { "max_per_slot": { "0": 600000000 } } }]
        }],
        "accounts": [
            { "account": "alice", "balances": { "USDC": "1000" } },
            { "account": "bob", "balances": { "USDC": "1000" } }
        ],
        "roles": [
            { "role": "do_hard_worker", "account": "keeper" },
            { "role": "reallocator", "account": "keeper" },
            { "role": "pauser", "account": "guardian" }
        ],
        "steps": [
            { "action": "deposit", "account": "alice", "vault": "stable", "amounts": ["500"] },
            { "action": "deposit", "account": "bob", "vault": "stable", "amounts": ["700"],
              "expect_error": "exceeds limit" },
            { "action": "flush", "vault": "stable" },
            { "action": "advance_time", "seconds": 86400 },
            { "action": "do_hard_work" },
            { "action": "sync", "vault": "stable" },
            { "action": "claim", "account": "alice" },
            { "action": "pause" },
            { "action": "deposit", "account": "bob", "vault": "stable", "amounts": ["100"],
              "expect_error": "system is paused" },
            { "action": "unpause" },
            { "action": "redeem", "account": "alice", "vault": "stable", "portion_bps": 5000 },
            { "action": "flush", "vault": "stable" },
            { "action": "do_hard_work" },
            { "action": "claim", "account": "alice", "vault": "stable" }
        ]
    })
}

fn parse(value: serde_json::Value) -> Scenario {
    serde_json::from_value(value).unwrap()
}

// ── Replay ───────────────────────────────────────────────────────────

#[test]
fn test_scenario_replays_full_lifecycle() {
    let parsed = parse(lifecycle());
    validate::validate(&parsed).unwrap();

    let (run, records) = scenario::run(&parsed).unwrap();
    assert_eq!(records.len(), parsed.steps.len());
    assert!(!records[1].ok);
    assert!(records[1].outcome.contains("deposit-limit"));
    assert!(!records[8].ok);
    assert_eq!(records.iter().filter(|r| !r.ok).count(), 2);
    assert_eq!(records[4].timestamp, START + DAY);
    assert_eq!(records.last().unwrap().outcome, "1 receipts claimed");

    // Half of Alice's 500 USDC came back; Bob never got in.
    assert_close(run.protocol.balance(ALICE, "USDC"), 750 * USDC, 5);
    assert_eq!(run.protocol.balance(BOB, "USDC"), 1000 * USDC);
    let aave = run.strategy_id("aave").unwrap();
    assert_close(run.protocol.source(aave).unwrap().assets()[0], 175 * USDC, 5);
}

#[test]
fn test_unexpected_failure_aborts_replay() {
    let mut value = lifecycle();
    value["steps"][1]
        .as_object_mut()
        .unwrap()
        .remove("expect_error");
    let err = scenario::run(&parse(value)).err().unwrap();
    let rendered = format!("{err:#}");
    assert!(rendered.contains("step 1 (deposit)"));
    assert!(rendered.contains("exceeds limit"));
}

#[test]
fn test_expected_error_that_does_not_happen_fails() {
    let mut value = lifecycle();
    value["steps"][0]["expect_error"] = json!("system is paused");
    let err = scenario::run(&parse(value)).err().unwrap();
    assert!(format!("{err:#}").contains("expected error `system is paused`"));
}

#[test]
fn test_validate_catches_unknown_references_in_steps() {
    let mut value = lifecycle();
    value["steps"][2]["vault"] = json!("missing");
    value["steps"][4] = json!({ "action": "do_hard_work", "strategies": ["euler"] });
    let errors = validate::validate(&parse(value)).unwrap_err();
    let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    assert!(rendered.iter().any(|e| e.contains("unknown vault `missing`")));
    assert!(rendered.iter().any(|e| e.contains("unknown strategy `euler`")));
}

// ── Conservation ─────────────────────────────────────────────────────

#[test]
fn test_random_rounds_conserve_assets_and_shares() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut fx = protocol(3);
    fx.vault(&[5000, 3000, 2000], Default::default());
    let accounts = [ALICE, BOB, CAROL];
    for account in accounts {
        fx.fund(account, 10_000);
    }
    let funded = 30_000 * USDC;

    for round in 0..20 {
        for account in accounts {
            let shares = fx.protocol.vault_shares(VAULT, account).unwrap();
            if shares > 0 && rng.random_bool(0.4) {
                let portion = shares * rng.random_range(1..=10u128) / 10;
                if rng.random_bool(0.3) {
                    fx.protocol.redeem_fast(account, VAULT, portion).unwrap();
                } else {
                    fx.protocol.redeem(account, VAULT, portion).unwrap();
                }
            } else if rng.random_bool(0.7) {
                let amount = rng.random_range(1..=500u128) * USDC + rng.random_range(0..USDC);
                if amount <= fx.usdc(account) {
                    fx.protocol.deposit(account, VAULT, &[amount]).unwrap();
                }
            }
        }
        fx.protocol.flush(VAULT).unwrap();
        fx.clock.advance(DAY);
        // Skipped harvests leave flushes unsynced while the next round's
        // requests queue up behind them.
        if rng.random_bool(0.6) {
            fx.harvest_all();
            for account in accounts {
                fx.protocol.claim_all(account, VAULT).unwrap();
            }
            assert!(fx.protocol.claimable(ALICE).is_empty());
        }

        let held: u128 = (0..3).map(|slot| fx.holdings(slot)).sum();
        let loose = fx.protocol.state().balances.total("USDC");
        assert_eq!(held + loose, funded, "round {round}: USDC leaked");

        let vault = fx.protocol.vault(VAULT).unwrap();
        let sum: u128 = vault.shares.holders().map(|(_, b)| *b).sum();
        assert_eq!(sum, vault.shares.total_supply(), "round {round}: share ledger");
        for id in &fx.strategies {
            let strategy = fx.protocol.strategy(*id).unwrap();
            let sum: u128 = strategy.shares.holders().map(|(_, b)| *b).sum();
            assert_eq!(sum, strategy.shares.total_supply());
        }
    }

    fx.protocol.flush(VAULT).unwrap();
    fx.harvest_all();
    for account in accounts {
        fx.protocol.claim_all(account, VAULT).unwrap();
    }

    // Without yield or fees every account is worth what it was funded with,
    // less rounding.
    let value = fx.protocol.vault_value(VAULT).unwrap();
    let supply = fx.protocol.vault(VAULT).unwrap().shares.total_supply();
    for account in accounts {
        let shares = fx.protocol.vault_shares(VAULT, account).unwrap();
        let worth = value_of_shares(shares, supply, value).unwrap() + fx.usdc(account) * (WAD / USDC);
        assert_close(worth, 10_000 * WAD, WAD / 100);
    }
}
