mod common;

use std::collections::BTreeMap;

use vault_flow::VaultError;
use vault_flow::engine::harvest::DoHardWork;
use vault_flow::error::ErrorKind;
use vault_flow::math::{WAD, YIELD_FULL_PERCENT, value_of_shares};
use vault_flow::model::{MASTER_WALLET, StrategyFees, VaultFees};
use vault_flow::oracle::RateBound;
use vault_flow::strategy::{RoundStatus, SimulatedSourceConfig, StrategyKind};

use common::*;

// ── Helpers ──────────────────────────────────────────────────────────

fn settled(count: usize, allocation: &[u16]) -> Fixture {
    let mut fx = protocol(count);
    fx.vault(allocation, VaultFees::default());
    fx.fund(ALICE, 1000);
    fx.deposit_and_settle(ALICE, 1000);
    fx
}

fn with_platform_fees() -> StrategySetup {
    StrategySetup {
        fees: StrategyFees {
            ecosystem_bps: 500,
            treasury_bps: 500,
            ..StrategyFees::default()
        },
        ..Default::default()
    }
}

// ── Yield ────────────────────────────────────────────────────────────

#[test]
fn test_base_yield_records_apy() {
    let mut fx = settled(3, &[6000, 3000, 1000]);
    fx.clock.advance(YEAR / 10);
    fx.harvest_with_yields(vec![YIELD_FULL_PERCENT / 10, 0, 0]);

    assert_eq!(fx.holdings(0), 660 * USDC);
    let history = fx.protocol.apy_history(fx.strategies[0]).unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.dhw_index, 2);
    assert_eq!(last.yield_pct, YIELD_FULL_PERCENT / 10);
    // 10% over a tenth of a year.
    assert_eq!(last.apy, YIELD_FULL_PERCENT);
    assert_eq!(fx.protocol.apy_history(fx.strategies[1]).unwrap().last().unwrap().apy, 0);

    assert_close(fx.protocol.vault_value(VAULT).unwrap(), 1060 * WAD, WAD / 1000);
}

#[test]
fn test_platform_fees_take_their_cut_of_yield() {
    let mut fx = protocol_with(vec![with_platform_fees()]);
    fx.vault(&[10_000], VaultFees::default());
    fx.fund(ALICE, 1000);
    fx.deposit_and_settle(ALICE, 1000);

    let request = DoHardWork {
        base_yields: vec![YIELD_FULL_PERCENT / 10],
        ..DoHardWork::new(fx.strategies.clone())
    };
    let summary = fx.protocol.do_hard_work(KEEPER, &request).unwrap().remove(0);
    assert!(summary.platform_fee_shares > 0);

    let strategy = fx.protocol.strategy(fx.strategies[0]).unwrap();
    let ecosystem = strategy.shares.balance_of("ecosystem");
    let treasury = strategy.shares.balance_of("treasury");
    assert_eq!(ecosystem + treasury, summary.platform_fee_shares);
    assert_close(ecosystem, treasury, 1);

    // 10% of the 100 USD gain goes to fee holders.
    assert_close(fx.protocol.vault_value(VAULT).unwrap(), 1090 * WAD, WAD / 1000);
}

#[test]
fn test_negative_yield_mints_no_fees() {
    let mut fx = protocol_with(vec![with_platform_fees()]);
    fx.vault(&[10_000], VaultFees::default());
    fx.fund(ALICE, 1000);
    fx.deposit_and_settle(ALICE, 1000);

    fx.harvest_with_yields(vec![-YIELD_FULL_PERCENT / 20]);
    assert_eq!(fx.holdings(0), 950 * USDC);
    let strategy = fx.protocol.strategy(fx.strategies[0]).unwrap();
    assert_eq!(strategy.shares.balance_of("ecosystem"), 0);
    assert_eq!(strategy.last_apy(), 0);
    assert_eq!(strategy.apy_history.last().unwrap().yield_pct, -YIELD_FULL_PERCENT / 20);
}

#[test]
fn test_rewards_are_compounded() {
    let mut fx = settled(3, &[6000, 3000, 1000]);
    fx.protocol
        .simulated_source_mut(fx.strategies[0])
        .unwrap()
        .add_rewards(&[9 * USDC]);
    fx.harvest_all();

    assert_eq!(fx.holdings(0), 609 * USDC);
    assert_close(fx.protocol.vault_value(VAULT).unwrap(), 1009 * WAD, WAD / 1000);
}

// ── Access and guards ────────────────────────────────────────────────

#[test]
fn test_harvest_requires_keeper_role() {
    let mut fx = settled(1, &[10_000]);
    let err = fx
        .protocol
        .do_hard_work(ALICE, &DoHardWork::new(fx.strategies.clone()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
}

#[test]
fn test_rate_bounds_reject_drifted_price() {
    let mut fx = settled(1, &[10_000]);
    fx.oracle.set_rate("USDC", 2 * WAD);
    let request = DoHardWork {
        rate_bounds: BTreeMap::from([(
            "USDC".to_string(),
            RateBound {
                min: WAD * 99 / 100,
                max: WAD * 101 / 100,
            },
        )]),
        ..DoHardWork::new(fx.strategies.clone())
    };
    let err = fx.protocol.do_hard_work(KEEPER, &request).unwrap_err();
    assert!(matches!(err, VaultError::ExchangeRateOutOfBounds { .. }));

    fx.oracle.set_rate("USDC", WAD);
    fx.protocol.do_hard_work(KEEPER, &request).unwrap();
}

#[test]
fn test_pause_blocks_requests_and_harvests() {
    let mut fx = settled(1, &[10_000]);
    fx.fund(BOB, 10);

    let err = fx.protocol.pause(ALICE).unwrap_err();
    assert!(matches!(err, VaultError::MissingRole { .. }));

    fx.protocol.pause(GUARDIAN).unwrap();
    assert!(fx.protocol.is_paused());
    assert_eq!(
        fx.protocol.deposit(BOB, VAULT, &[USDC]).unwrap_err(),
        VaultError::SystemPaused
    );
    assert_eq!(
        fx.protocol
            .do_hard_work(KEEPER, &DoHardWork::new(fx.strategies.clone()))
            .unwrap_err(),
        VaultError::SystemPaused
    );

    fx.protocol.unpause(GUARDIAN).unwrap();
    fx.protocol.deposit(BOB, VAULT, &[USDC]).unwrap();
}

#[test]
fn test_source_failure_rolls_back_every_strategy() {
    let mut fx = protocol(3);
    fx.vault(&[6000, 3000, 1000], VaultFees::default());
    fx.fund(ALICE, 1000);
    fx.protocol.deposit(ALICE, VAULT, &[1000 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();

    fx.protocol.simulated_source_mut(fx.strategies[2]).unwrap().fail_next();
    let err = fx
        .protocol
        .do_hard_work(KEEPER, &DoHardWork::new(fx.strategies.clone()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::External);

    // The first two strategies had already deposited; all of it is undone.
    assert_eq!(fx.holdings(0), 0);
    assert_eq!(fx.usdc(MASTER_WALLET), 1000 * USDC);
    assert_eq!(fx.protocol.strategy(fx.strategies[0]).unwrap().dhw_index, 1);

    // The injected failure was consumed.
    fx.harvest_all();
    assert_eq!(fx.holdings(2), 100 * USDC);
}

// ── Non-atomic strategies ────────────────────────────────────────────

#[test]
fn test_async_deposit_waits_for_continuation() {
    let mut fx = protocol_with(vec![StrategySetup::with_kind(
        StrategyKind::NonAtomicDeposit,
        SimulatedSourceConfig {
            deposit_async: true,
            haircut_bps: 100,
            ..Default::default()
        },
    )]);
    fx.vault(&[10_000], VaultFees::default());
    fx.fund(ALICE, 1000);
    let receipt = fx.protocol.deposit(ALICE, VAULT, &[1000 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();

    let request = DoHardWork::new(fx.strategies.clone());
    let summary = fx.protocol.do_hard_work(KEEPER, &request).unwrap().remove(0);
    assert_eq!(summary.status, RoundStatus::PendingContinuation);
    let id = fx.strategies[0];
    assert_eq!(fx.protocol.strategy(id).unwrap().pending_round(), Some(1));
    assert!(fx.protocol.sync_vault(VAULT).unwrap().is_empty());

    assert_eq!(
        fx.protocol.do_hard_work(KEEPER, &request).unwrap_err(),
        VaultError::ContinuationPending(id)
    );
    assert_eq!(
        fx.protocol.continue_harvest(KEEPER, &request).unwrap_err(),
        VaultError::ContinuationNotConfirmed(id)
    );

    fx.protocol.simulated_source_mut(id).unwrap().confirm();
    let summary = fx.protocol.continue_harvest(KEEPER, &request).unwrap().remove(0);
    assert_eq!(summary.status, RoundStatus::Finalized);
    assert_eq!(fx.holdings(0), 990 * USDC);

    fx.protocol.sync_vault(VAULT).unwrap();
    fx.protocol.claim(ALICE, receipt).unwrap();
    // The haircut is borne by the depositors of the round.
    assert_close(fx.protocol.vault_value(VAULT).unwrap(), 990 * WAD, WAD / 1000);
    assert_eq!(
        fx.protocol.vault_shares(VAULT, ALICE).unwrap(),
        990 * WAD - 2_000_000
    );
}

#[test]
fn test_async_withdrawal_pays_after_confirmation() {
    let mut fx = protocol_with(vec![StrategySetup::with_kind(
        StrategyKind::NonAtomicWithdrawal,
        SimulatedSourceConfig {
            withdraw_async: true,
            ..Default::default()
        },
    )]);
    fx.vault(&[10_000], VaultFees::default());
    fx.fund(ALICE, 1000);
    let shares = fx.deposit_and_settle(ALICE, 1000);

    let receipt = fx.protocol.redeem(ALICE, VAULT, shares).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    let request = DoHardWork::new(fx.strategies.clone());
    fx.protocol.do_hard_work(KEEPER, &request).unwrap();

    let (_, withdrawing) = fx
        .protocol
        .simulated_source_mut(fx.strategies[0])
        .unwrap()
        .in_flight();
    assert_close(withdrawing[0], 1000 * USDC, 5);
    assert_eq!(
        fx.protocol.claim(ALICE, receipt).unwrap_err().kind(),
        ErrorKind::NotReady
    );

    fx.protocol.simulated_source_mut(fx.strategies[0]).unwrap().confirm();
    fx.protocol.continue_harvest(KEEPER, &request).unwrap();
    fx.protocol.claim(ALICE, receipt).unwrap();
    assert_close(fx.usdc(ALICE), 1000 * USDC, 5);
}

#[test]
fn test_async_round_with_rewards_yield_and_matched_deposit() {
    let mut fx = protocol_with(vec![StrategySetup::with_kind(
        StrategyKind::NonAtomic,
        SimulatedSourceConfig {
            withdraw_async: true,
            ..Default::default()
        },
    )]);
    let id = fx.strategies[0];
    fx.vault(&[10_000], VaultFees::default());
    fx.fund(ALICE, 500);
    fx.fund(BOB, 250);
    fx.fund(CAROL, 200);
    fx.protocol.deposit(ALICE, VAULT, &[500 * USDC]).unwrap();
    fx.protocol.deposit(BOB, VAULT, &[250 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    fx.harvest_all();
    fx.protocol.sync_vault(VAULT).unwrap();
    fx.protocol.claim_all(ALICE, VAULT).unwrap();
    fx.protocol.claim_all(BOB, VAULT).unwrap();
    let alice_shares = fx.protocol.vault_shares(VAULT, ALICE).unwrap();
    assert_eq!(alice_shares, 500 * WAD - 1_333_334);

    // Alice leaves while Carol joins; 10 USDC of rewards wait to be claimed.
    fx.protocol.simulated_source_mut(id).unwrap().add_rewards(&[10 * USDC]);
    let receipt = fx.protocol.redeem(ALICE, VAULT, alice_shares).unwrap();
    fx.protocol.deposit(CAROL, VAULT, &[200 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();

    let request = DoHardWork {
        base_yields: vec![YIELD_FULL_PERCENT / 10],
        ..DoHardWork::new(fx.strategies.clone())
    };
    let summary = fx.protocol.do_hard_work(KEEPER, &request).unwrap().remove(0);
    assert_eq!(summary.status, RoundStatus::PendingContinuation);
    // Entitlement: two thirds of 825 held plus 10 claimed. Rewards and
    // Carol's deposit cover 210 of it; the rest leaves the source.
    assert_eq!(summary.matched, vec![210 * USDC]);
    assert_eq!(summary.withdrawn, vec![346_666_666]);
    assert_eq!(summary.deposited, vec![0]);
    assert_eq!(fx.holdings(0), 478_333_334);
    assert_eq!(
        fx.protocol.simulated_source_mut(id).unwrap().in_flight().1,
        &[346_666_666]
    );

    // Another 10% accrues before the source confirms.
    fx.protocol.simulated_source_mut(id).unwrap().confirm();
    let summary = fx.protocol.continue_harvest(KEEPER, &request).unwrap().remove(0);
    assert_eq!(summary.status, RoundStatus::Finalized);
    assert_eq!(fx.holdings(0), 526_166_667);
    let round = &fx.protocol.strategy(id).unwrap().rounds[&summary.dhw_index];
    assert_eq!(round.withdrawn_assets, vec![556_666_666]);
    assert_eq!(round.compound, vec![10 * USDC]);

    fx.protocol.claim(ALICE, receipt).unwrap();
    fx.protocol.claim_all(CAROL, VAULT).unwrap();
    assert_eq!(fx.usdc(ALICE), 556_666_666);
    assert_eq!(fx.usdc(MASTER_WALLET), 0);

    // Continuation yield belongs to everyone still in the strategy.
    let value = fx.protocol.vault_value(VAULT).unwrap();
    assert_close(value, 526_166_667 * 1_000_000_000_000, WAD / 1_000_000);
    let supply = fx.protocol.vault(VAULT).unwrap().shares.total_supply();
    let worth = |account| {
        value_of_shares(fx.protocol.vault_shares(VAULT, account).unwrap(), supply, value).unwrap()
    };
    assert_close(worth(CAROL), 220 * WAD, WAD / 1000);
    assert_close(worth(BOB), 306_166_667 * 1_000_000_000_000, WAD / 1000);
}

#[test]
fn test_continue_without_pending_round_fails() {
    let mut fx = settled(1, &[10_000]);
    let err = fx
        .protocol
        .continue_harvest(KEEPER, &DoHardWork::new(fx.strategies.clone()))
        .unwrap_err();
    assert_eq!(err, VaultError::NoPendingContinuation(fx.strategies[0]));
}
