use thiserror::Error;

use crate::access::Role;
use crate::model::{AccountId, StrategyId, VaultId};
use crate::strategy::LiquidityShortfall;

pub type VaultResult<T> = Result<T, VaultError>;

/// Coarse classification so callers can tell "retry later" from "invalid".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Invariant,
    InsufficientBalance,
    NotReady,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    // ── Authorization ──
    #[error("account `{account}` lacks role {role:?}")]
    MissingRole { account: AccountId, role: Role },

    #[error("account `{account}` does not own receipt {receipt}")]
    NotReceiptOwner { account: AccountId, receipt: u64 },

    #[error("request rejected by guard `{guard}`: {reason}")]
    GuardRejected { guard: String, reason: String },

    #[error("system is paused")]
    SystemPaused,

    // ── Invariant violations ──
    #[error("allocation sums to {sum} bps, expected 10000")]
    InvalidAllocation { sum: u128 },

    #[error("expected {expected} entries, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("vault has more than {max} strategies")]
    TooManyStrategies { max: usize },

    #[error("strategy {strategy} does not support asset group {group}")]
    AssetGroupMismatch { strategy: StrategyId, group: usize },

    #[error("vaults in one reallocation must share an asset group")]
    MixedAssetGroups,

    #[error("unknown asset `{0}`")]
    UnknownAsset(String),

    #[error("asset `{0}` is already registered")]
    DuplicateAsset(String),

    #[error("unknown asset group {0}")]
    UnknownAssetGroup(usize),

    #[error("unknown vault `{0}`")]
    UnknownVault(VaultId),

    #[error("vault `{0}` already exists")]
    DuplicateVault(VaultId),

    #[error("unknown strategy {0}")]
    UnknownStrategy(StrategyId),

    #[error("strategy {0} appears more than once")]
    DuplicateStrategy(StrategyId),

    #[error("strategy {0} has been removed")]
    StrategyRemoved(StrategyId),

    #[error("vault `{0}` uses a static allocation")]
    StaticAllocation(VaultId),

    #[error("fee `{name}` of {bps} bps exceeds the {max} bps cap")]
    FeeTooHigh { name: &'static str, bps: u128, max: u128 },

    #[error("exchange rate {rate} for `{asset}` outside [{min}, {max}]")]
    ExchangeRateOutOfBounds { asset: String, rate: u128, min: u128, max: u128 },

    #[error("`{0}` is reserved for internal holders")]
    ReservedAccount(AccountId),

    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("vault `{0}` has no active strategy to receive deposits")]
    NoActiveStrategy(VaultId),

    #[error("receipts must share vault, round and kind to merge")]
    IncompatibleReceipts,

    #[error("unknown receipt {0}")]
    UnknownReceipt(u64),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid round transition for strategy {strategy}: {from} -> {to}")]
    InvalidTransition { strategy: StrategyId, from: &'static str, to: &'static str },

    // ── Insufficient balance ──
    #[error("`{account}` holds {available} shares, requested {requested}")]
    InsufficientShares { account: AccountId, requested: u128, available: u128 },

    #[error("`{account}` holds {available} of `{asset}`, requested {requested}")]
    InsufficientAssets { account: AccountId, asset: String, requested: u128, available: u128 },

    #[error("strategy {0} cannot cover the requested withdrawal")]
    InsufficientLiquidity(StrategyId),

    // ── Not ready ──
    #[error("receipt {receipt} belongs to round {flush} of `{vault}`, which is not synced yet")]
    ReceiptNotSynced { receipt: u64, vault: VaultId, flush: u64 },

    #[error("receipt {0} has already been claimed")]
    ReceiptAlreadyClaimed(u64),

    #[error("strategy {0} has no pending continuation")]
    NoPendingContinuation(StrategyId),

    #[error("strategy {0} is waiting on the yield source to confirm a pending leg")]
    ContinuationNotConfirmed(StrategyId),

    #[error("strategy {0} has a continuation pending")]
    ContinuationPending(StrategyId),

    #[error("strategy {0} has flushed flows that were not harvested yet")]
    UnprocessedFlows(StrategyId),

    #[error("vault `{0}` has flushed rounds that are not synced yet")]
    VaultNotSynced(VaultId),

    // ── External ──
    #[error("yield source of strategy {strategy} failed: {message}")]
    YieldSource { strategy: StrategyId, message: String },

    #[error("allocation provider failed: {0}")]
    AllocationProvider(String),

    #[error("price oracle has no rate for `{asset}`: {message}")]
    PriceUnavailable { asset: String, message: String },
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        use VaultError::*;
        match self {
            MissingRole { .. } | NotReceiptOwner { .. } | GuardRejected { .. } | SystemPaused => {
                ErrorKind::Authorization
            }
            InsufficientShares { .. } | InsufficientAssets { .. } | InsufficientLiquidity(_) => {
                ErrorKind::InsufficientBalance
            }
            ReceiptNotSynced { .. }
            | NoPendingContinuation(_)
            | ContinuationNotConfirmed(_)
            | ContinuationPending(_)
            | UnprocessedFlows(_)
            | VaultNotSynced(_) => ErrorKind::NotReady,
            YieldSource { .. } | PriceUnavailable { .. } | AllocationProvider(_) => {
                ErrorKind::External
            }
            _ => ErrorKind::Invariant,
        }
    }

    pub(crate) fn from_source(strategy: StrategyId, err: anyhow::Error) -> Self {
        if err.downcast_ref::<LiquidityShortfall>().is_some() {
            return VaultError::InsufficientLiquidity(strategy);
        }
        VaultError::YieldSource {
            strategy,
            message: format!("{err:#}"),
        }
    }
}
