mod common;

use vault_flow::VaultError;
use vault_flow::error::ErrorKind;
use vault_flow::math::{WAD, value_of_shares};
use vault_flow::model::{ESCROW, LOCKED, MASTER_WALLET, VaultFees};

use common::*;

// ── Constants ────────────────────────────────────────────────────────

const SPLIT: [u16; 3] = [6000, 3000, 1000];

/// Strategy shares locked on each ledger's first mint.
const LOCKED_SHARES: u128 = 1_000_000;

// ── Helpers ──────────────────────────────────────────────────────────

fn three_way() -> Fixture {
    let mut fx = protocol(3);
    fx.vault(&SPLIT, VaultFees::default());
    fx
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn test_deposit_settles_through_one_round() {
    let mut fx = three_way();
    fx.fund(ALICE, 1000);

    let receipt = fx.protocol.deposit(ALICE, VAULT, &[1000 * USDC]).unwrap();
    assert_eq!(fx.usdc(ALICE), 0);
    assert_eq!(fx.usdc(MASTER_WALLET), 1000 * USDC);

    assert_eq!(fx.protocol.flush(VAULT).unwrap(), Some(1));
    fx.harvest_all();
    assert_eq!(fx.holdings(0), 600 * USDC);
    assert_eq!(fx.holdings(1), 300 * USDC);
    assert_eq!(fx.holdings(2), 100 * USDC);
    assert_eq!(fx.usdc(MASTER_WALLET), 0);

    let outcomes = fx.protocol.sync_vault(VAULT).unwrap();
    assert_eq!(outcomes.len(), 1);
    fx.protocol.claim(ALICE, receipt).unwrap();

    // Three strategy ledgers and the vault ledger each lock a slice.
    let shares = fx.protocol.vault_shares(VAULT, ALICE).unwrap();
    assert_eq!(shares, 1000 * WAD - 4 * LOCKED_SHARES);
    assert_eq!(fx.protocol.vault_shares(VAULT, LOCKED).unwrap(), LOCKED_SHARES);
    assert_eq!(
        fx.protocol.vault_value(VAULT).unwrap(),
        1000 * WAD - 3 * LOCKED_SHARES
    );
}

#[test]
fn test_claim_before_sync_is_not_ready() {
    let mut fx = three_way();
    fx.fund(ALICE, 100);
    let receipt = fx.protocol.deposit(ALICE, VAULT, &[100 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();

    let claimable = fx.protocol.claimable(ALICE);
    assert_eq!(claimable.len(), 1);
    assert!(!claimable[0].ready);

    let err = fx.protocol.claim(ALICE, receipt).unwrap_err();
    assert!(matches!(err, VaultError::ReceiptNotSynced { .. }));
    assert_eq!(err.kind(), ErrorKind::NotReady);

    // Sync without a harvest leaves the flush pending.
    assert!(fx.protocol.sync_vault(VAULT).unwrap().is_empty());

    // Harvested but not synced: the claim syncs on the way.
    fx.harvest_all();
    assert!(!fx.protocol.claimable(ALICE)[0].ready);
    fx.protocol.claim(ALICE, receipt).unwrap();
    assert_eq!(fx.protocol.vault(VAULT).unwrap().next_sync, 2);
    let err = fx.protocol.claim(ALICE, receipt).unwrap_err();
    assert_eq!(err, VaultError::ReceiptAlreadyClaimed(receipt));
}

#[test]
fn test_two_depositors_split_escrow_pro_rata() {
    let mut fx = three_way();
    fx.fund(ALICE, 1000);
    fx.fund(BOB, 500);
    fx.protocol.deposit(ALICE, VAULT, &[1000 * USDC]).unwrap();
    fx.protocol.deposit(BOB, VAULT, &[500 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    fx.harvest_all();

    let outcome = fx.protocol.sync_vault(VAULT).unwrap().remove(0);
    fx.protocol.claim_all(BOB, VAULT).unwrap();
    fx.protocol.claim_all(ALICE, VAULT).unwrap();

    let alice = fx.protocol.vault_shares(VAULT, ALICE).unwrap();
    let bob = fx.protocol.vault_shares(VAULT, BOB).unwrap();
    assert_eq!(alice + bob, outcome.escrowed_shares);
    assert_close(alice, 2 * bob, 2);
}

#[test]
fn test_empty_flush_is_a_no_op() {
    let mut fx = three_way();
    assert_eq!(fx.protocol.flush(VAULT).unwrap(), None);
    assert_eq!(fx.protocol.vault(VAULT).unwrap().flush_index, 1);
}

#[test]
fn test_rejects_zero_and_misshaped_deposits() {
    let mut fx = three_way();
    fx.fund(ALICE, 10);

    let err = fx.protocol.deposit(ALICE, VAULT, &[0]).unwrap_err();
    assert_eq!(err, VaultError::ZeroAmount);

    let err = fx.protocol.deposit(ALICE, VAULT, &[USDC, USDC]).unwrap_err();
    assert!(matches!(err, VaultError::LengthMismatch { expected: 1, got: 2 }));

    let err = fx.protocol.deposit(ALICE, VAULT, &[11 * USDC]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

    let err = fx.protocol.deposit("@master", VAULT, &[USDC]).unwrap_err();
    assert!(matches!(err, VaultError::ReservedAccount(_)));

    // Nothing moved.
    assert_eq!(fx.usdc(ALICE), 10 * USDC);
    assert!(fx.protocol.vault(VAULT).unwrap().batch.is_empty());
}

#[test]
fn test_rounding_dust_carries_to_next_flush() {
    let mut fx = protocol(3);
    fx.vault(&[3333, 3333, 3334], VaultFees::default());
    fx.fund(ALICE, 10);

    fx.protocol.deposit(ALICE, VAULT, &[USDC + 1]).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    assert_eq!(fx.protocol.vault(VAULT).unwrap().dust, vec![1]);

    fx.harvest_all();
    assert_eq!(fx.holdings(0) + fx.holdings(1) + fx.holdings(2), USDC);
    // The dust unit stays in the master wallet until the next flush.
    assert_eq!(fx.usdc(MASTER_WALLET), 1);

    fx.protocol.sync_vault(VAULT).unwrap();
    fx.protocol.deposit(ALICE, VAULT, &[USDC - 1]).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    assert_eq!(fx.protocol.vault(VAULT).unwrap().dust, vec![0]);
    fx.harvest_all();
    assert_eq!(fx.holdings(0) + fx.holdings(1) + fx.holdings(2), 2 * USDC);
    assert_eq!(fx.usdc(MASTER_WALLET), 0);
}

#[test]
fn test_merged_receipts_claim_as_one() {
    let mut fx = three_way();
    fx.fund(ALICE, 300);
    let first = fx.protocol.deposit(ALICE, VAULT, &[100 * USDC]).unwrap();
    let second = fx.protocol.deposit(ALICE, VAULT, &[200 * USDC]).unwrap();
    let merged = fx.protocol.merge_receipts(ALICE, &[first, second]).unwrap();
    assert_eq!(fx.protocol.claimable(ALICE).len(), 1);

    fx.protocol.flush(VAULT).unwrap();
    fx.harvest_all();
    fx.protocol.sync_vault(VAULT).unwrap();
    let outcome = fx.protocol.vault(VAULT).unwrap().flushes[&1].sync.clone().unwrap();
    fx.protocol.claim(ALICE, merged).unwrap();
    assert_eq!(fx.protocol.vault_shares(VAULT, ALICE).unwrap(), outcome.escrowed_shares);
}

#[test]
fn test_merged_receipt_shares_escrow_with_other_depositors() {
    let mut fx = three_way();
    fx.fund(ALICE, 300);
    fx.fund(BOB, 300);
    let first = fx.protocol.deposit(ALICE, VAULT, &[100 * USDC]).unwrap();
    let second = fx.protocol.deposit(ALICE, VAULT, &[200 * USDC]).unwrap();
    fx.protocol.merge_receipts(ALICE, &[first, second]).unwrap();
    fx.protocol.deposit(BOB, VAULT, &[300 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    fx.harvest_all();

    let outcome = fx.protocol.sync_vault(VAULT).unwrap().remove(0);
    fx.protocol.claim_all(ALICE, VAULT).unwrap();
    fx.protocol.claim_all(BOB, VAULT).unwrap();

    let alice = fx.protocol.vault_shares(VAULT, ALICE).unwrap();
    let bob = fx.protocol.vault_shares(VAULT, BOB).unwrap();
    assert_eq!(alice, outcome.escrowed_shares / 2);
    assert_eq!(alice + bob, outcome.escrowed_shares);
    assert_eq!(fx.protocol.vault_shares(VAULT, ESCROW).unwrap(), 0);
}

#[test]
fn test_redeem_round_trips_assets() {
    let mut fx = three_way();
    fx.fund(ALICE, 1000);
    let shares = fx.deposit_and_settle(ALICE, 1000);

    let receipt = fx.protocol.redeem(ALICE, VAULT, shares).unwrap();
    assert_eq!(fx.protocol.vault_shares(VAULT, ALICE).unwrap(), 0);
    fx.protocol.flush(VAULT).unwrap();
    fx.harvest_all();
    fx.protocol.sync_vault(VAULT).unwrap();
    fx.protocol.claim(ALICE, receipt).unwrap();

    // Only the locked slices stay behind.
    assert_close(fx.usdc(ALICE), 1000 * USDC, 10);
    assert!(fx.usdc(ALICE) <= 1000 * USDC);
}

#[test]
fn test_redeem_more_than_held_fails() {
    let mut fx = three_way();
    fx.fund(ALICE, 10);
    let shares = fx.deposit_and_settle(ALICE, 10);
    let err = fx.protocol.redeem(ALICE, VAULT, shares + 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
    assert_eq!(fx.protocol.vault_shares(VAULT, ALICE).unwrap(), shares);
}

#[test]
fn test_deposit_and_redeem_in_one_batch_are_matched() {
    let mut fx = three_way();
    fx.fund(ALICE, 1000);
    fx.fund(BOB, 400);
    let shares = fx.deposit_and_settle(ALICE, 1000);

    // Bob deposits 400 while Alice withdraws about half; the flows net per strategy.
    let bob = fx.protocol.deposit(BOB, VAULT, &[400 * USDC]).unwrap();
    let alice = fx.protocol.redeem(ALICE, VAULT, shares / 2).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    let calls_before = fx
        .protocol
        .simulated_source_mut(fx.strategies[0])
        .unwrap()
        .calls()
        .clone();
    fx.harvest_all();
    let calls = fx
        .protocol
        .simulated_source_mut(fx.strategies[0])
        .unwrap()
        .calls()
        .clone();
    // 240 in against about 300 out: only the difference is withdrawn.
    assert_eq!(calls.deposits, calls_before.deposits);
    assert_eq!(calls.withdrawals, calls_before.withdrawals + 1);
    assert_close(fx.holdings(0), 540 * USDC, 10);

    fx.protocol.sync_vault(VAULT).unwrap();
    fx.protocol.claim(BOB, bob).unwrap();
    fx.protocol.claim(ALICE, alice).unwrap();
    assert_close(fx.usdc(ALICE), 500 * USDC, 10);
    assert!(fx.protocol.vault_shares(VAULT, BOB).unwrap() > 0);
}

#[test]
fn test_redeem_queued_behind_unsynced_flush() {
    let mut fx = protocol(1);
    fx.vault(&[10_000], VaultFees::default());
    fx.fund(ALICE, 100);
    fx.fund(BOB, 100);
    let shares = fx.deposit_and_settle(ALICE, 100);
    assert_eq!(shares, 100 * WAD - 2_000_000);

    // Bob's flush is still waiting on its harvest when Alice queues half.
    fx.protocol.deposit(BOB, VAULT, &[100 * USDC]).unwrap();
    fx.protocol.flush(VAULT).unwrap();
    let receipt = fx.protocol.redeem(ALICE, VAULT, shares / 2).unwrap();
    fx.harvest_all();
    fx.protocol.sync_vault(VAULT).unwrap();
    fx.protocol.claim_all(BOB, VAULT).unwrap();

    // The queued half still counts towards the price Bob buys in at.
    assert_eq!(fx.protocol.vault_shares(VAULT, BOB).unwrap(), 100 * WAD);

    fx.protocol.flush(VAULT).unwrap();
    fx.harvest_all();
    fx.protocol.claim(ALICE, receipt).unwrap();
    assert_eq!(fx.usdc(ALICE), 49_999_999);
    assert_eq!(fx.holdings(0), 150_000_001);

    let value = fx.protocol.vault_value(VAULT).unwrap();
    let supply = fx.protocol.vault(VAULT).unwrap().shares.total_supply();
    let bob = fx.protocol.vault_shares(VAULT, BOB).unwrap();
    let alice = fx.protocol.vault_shares(VAULT, ALICE).unwrap();
    assert_close(value_of_shares(bob, supply, value).unwrap(), 100 * WAD, WAD / 1000);
    assert_close(value_of_shares(alice, supply, value).unwrap(), 50 * WAD, WAD / 1000);
}

// ── Fast redemption ──────────────────────────────────────────────────

#[test]
fn test_redeem_fast_pays_without_a_round() {
    let mut fx = three_way();
    fx.fund(ALICE, 1000);
    let shares = fx.deposit_and_settle(ALICE, 1000);

    let paid = fx.protocol.redeem_fast(ALICE, VAULT, shares / 2).unwrap();
    assert_close(paid[0], 500 * USDC, 5);
    assert_close(fx.usdc(ALICE), 500 * USDC, 5);
    assert_eq!(fx.protocol.vault_shares(VAULT, ALICE).unwrap(), shares - shares / 2);
    assert_close(fx.holdings(0), 300 * USDC, 5);
    assert_close(fx.holdings(2), 50 * USDC, 5);
    // No flush was opened.
    assert_eq!(fx.protocol.vault(VAULT).unwrap().flush_index, 2);

    let err = fx.protocol.redeem_fast(ALICE, VAULT, shares).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
}

#[test]
fn test_redeem_fast_leaves_queued_redemption_whole() {
    let mut fx = protocol(1);
    fx.vault(&[10_000], VaultFees::default());
    fx.fund(ALICE, 100);
    fx.fund(BOB, 100);
    let alice_shares = fx.deposit_and_settle(ALICE, 100);
    let bob_shares = fx.deposit_and_settle(BOB, 100);
    assert_eq!(bob_shares, 100 * WAD);

    let receipt = fx.protocol.redeem(ALICE, VAULT, alice_shares).unwrap();
    let paid = fx.protocol.redeem_fast(BOB, VAULT, bob_shares).unwrap();
    assert_eq!(paid, vec![100 * USDC]);
    assert_eq!(fx.holdings(0), 100 * USDC);

    fx.protocol.flush(VAULT).unwrap();
    fx.harvest_all();
    fx.protocol.claim(ALICE, receipt).unwrap();
    assert_eq!(fx.usdc(ALICE), 99_999_999);
    assert_eq!(fx.usdc(BOB), 100 * USDC);
}
