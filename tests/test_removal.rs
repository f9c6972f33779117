mod common;

use vault_flow::VaultError;
use vault_flow::engine::harvest::DoHardWork;
use vault_flow::engine::removal::Removal;
use vault_flow::math::WAD;
use vault_flow::model::{StrategyId, VaultFees};
use vault_flow::strategy::StrategyStatus;

use common::*;

// ── Helpers ──────────────────────────────────────────────────────────

fn settled_three_way() -> Fixture {
    let mut fx = protocol(3);
    fx.vault(&[6000, 3000, 1000], VaultFees::default());
    fx.fund(ALICE, 1000);
    fx.deposit_and_settle(ALICE, 1000);
    fx
}

fn harvest(fx: &mut Fixture, strategies: &[StrategyId]) {
    fx.protocol
        .do_hard_work(KEEPER, &DoHardWork::new(strategies.to_vec()))
        .unwrap();
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn test_idle_strategy_exits_immediately() {
    let mut fx = settled_three_way();
    let removed = fx.strategies[2];

    let outcome = fx.protocol.remove_strategy(ADMIN, removed, GUARDIAN).unwrap();
    assert_eq!(
        outcome,
        Removal::Exited {
            assets: vec![100 * USDC]
        }
    );
    assert_eq!(fx.usdc(GUARDIAN), 100 * USDC);
    assert_eq!(fx.protocol.strategy(removed).unwrap().status, StrategyStatus::Removed);

    let vault = fx.protocol.vault(VAULT).unwrap();
    assert_eq!(vault.strategies[2], StrategyId::GHOST);
    assert_eq!(vault.allocation.0, vec![6667, 3333, 0]);
    assert_close(fx.protocol.vault_value(VAULT).unwrap(), 900 * WAD, WAD / 1000);
}

#[test]
fn test_vault_keeps_working_around_ghost_slot() {
    let mut fx = settled_three_way();
    fx.protocol.remove_strategy(ADMIN, fx.strategies[2], GUARDIAN).unwrap();

    fx.fund(BOB, 100);
    fx.protocol.deposit(BOB, VAULT, &[100 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    let live = fx.strategies[..2].to_vec();
    harvest(&mut fx, &live);
    fx.protocol.sync_vault(VAULT).unwrap();
    fx.protocol.claim_all(BOB, VAULT).unwrap();

    assert_close(fx.holdings(0), 666_670_000, 5);
    assert_close(fx.holdings(1), 333_330_000, 5);
    assert!(fx.protocol.vault_shares(VAULT, BOB).unwrap() > 0);

    // Harvesting a removed strategy is refused.
    let err = fx
        .protocol
        .do_hard_work(KEEPER, &DoHardWork::new(vec![fx.strategies[2]]))
        .unwrap_err();
    assert_eq!(err, VaultError::StrategyRemoved(fx.strategies[2]));

    // Reallocation cannot put weight back on the ghost slot.
    let err = fx
        .protocol
        .reallocate(
            KEEPER,
            &vault_flow::engine::reallocation::Reallocate {
                vaults: vec![VAULT.to_string()],
                allocations: [(VAULT.to_string(), vec![5000, 3000, 2000])].into(),
            },
        )
        .unwrap_err();
    assert_eq!(err, VaultError::StrategyRemoved(StrategyId::GHOST));
}

#[test]
fn test_strategy_with_flushed_flows_drains_first() {
    let mut fx = settled_three_way();
    let removed = fx.strategies[2];
    fx.fund(BOB, 10);
    fx.protocol.deposit(BOB, VAULT, &[10 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();

    let outcome = fx.protocol.remove_strategy(ADMIN, removed, GUARDIAN).unwrap();
    assert_eq!(outcome, Removal::Draining);
    assert!(matches!(
        fx.protocol.strategy(removed).unwrap().status,
        StrategyStatus::Draining { .. }
    ));
    assert_eq!(fx.usdc(GUARDIAN), 0);

    // The committed round still runs, then the exit follows.
    fx.harvest_all();
    assert_eq!(fx.protocol.strategy(removed).unwrap().status, StrategyStatus::Removed);
    assert_eq!(fx.usdc(GUARDIAN), 101 * USDC);
    assert_eq!(fx.holdings(2), 0);

    fx.protocol.sync_vault(VAULT).unwrap();
    fx.protocol.claim_all(BOB, VAULT).unwrap();
    assert_eq!(fx.protocol.vault(VAULT).unwrap().next_sync, 3);
}

#[test]
fn test_removal_between_harvest_and_sync_still_pays_withdrawal() {
    let mut fx = protocol(2);
    fx.vault(&[5000, 5000], VaultFees::default());
    fx.fund(ALICE, 1000);
    let shares = fx.deposit_and_settle(ALICE, 1000);
    assert_eq!(shares, 1000 * WAD - 3_000_000);

    let receipt = fx.protocol.redeem(ALICE, VAULT, shares / 2).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    fx.harvest_all();
    assert_eq!(fx.holdings(1), 250_000_001);

    // The round is finalized, so nothing holds the exit back.
    let removed = fx.strategies[1];
    let outcome = fx.protocol.remove_strategy(ADMIN, removed, GUARDIAN).unwrap();
    assert_eq!(
        outcome,
        Removal::Exited {
            assets: vec![250_000_001]
        }
    );
    let pending = fx.protocol.claimable(ALICE);
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].ready);

    fx.protocol.sync_vault(VAULT).unwrap();
    fx.protocol.claim(ALICE, receipt).unwrap();
    assert_eq!(fx.usdc(ALICE), 2 * 249_999_999);
    assert_eq!(fx.usdc(GUARDIAN), 250_000_001);
    let round = fx.protocol.strategy(removed).unwrap().round(2).unwrap();
    assert!(!round.has_unsettled());
    assert_close(fx.protocol.vault_value(VAULT).unwrap(), 250 * WAD, WAD / 1000);
}

#[test]
fn test_removal_checks_roles_and_state() {
    let mut fx = settled_three_way();
    let id = fx.strategies[0];

    let err = fx.protocol.remove_strategy(KEEPER, id, GUARDIAN).unwrap_err();
    assert!(matches!(err, VaultError::MissingRole { .. }));
    let err = fx.protocol.remove_strategy(ADMIN, id, ALICE).unwrap_err();
    assert!(matches!(err, VaultError::MissingRole { .. }));
    let err = fx
        .protocol
        .remove_strategy(ADMIN, StrategyId::GHOST, GUARDIAN)
        .unwrap_err();
    assert_eq!(err, VaultError::StrategyRemoved(StrategyId::GHOST));

    // Removal still works while paused.
    fx.protocol.pause(GUARDIAN).unwrap();
    fx.protocol.remove_strategy(ADMIN, id, GUARDIAN).unwrap();
    let err = fx.protocol.remove_strategy(ADMIN, id, GUARDIAN).unwrap_err();
    assert_eq!(err, VaultError::StrategyRemoved(id));
}

#[test]
fn test_vault_without_live_strategies_rejects_deposits() {
    let mut fx = protocol(1);
    fx.vault(&[10_000], VaultFees::default());
    fx.protocol.remove_strategy(ADMIN, fx.strategies[0], GUARDIAN).unwrap();
    fx.fund(ALICE, 10);
    let err = fx.protocol.deposit(ALICE, VAULT, &[USDC]).unwrap_err();
    assert_eq!(err, VaultError::NoActiveStrategy(VAULT.to_string()));
}
