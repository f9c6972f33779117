//! Pre/post hooks around user-facing requests.
//!
//! Guards can veto a request but never touch accounting state: they only
//! receive a read-only view of the request.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Deposit,
    Withdrawal,
    Claim,
    RedeemFast,
}

/// What a guard sees about a request.
#[derive(Debug, Clone)]
pub struct GuardRequest<'a> {
    pub kind: RequestType,
    pub vault: &'a str,
    pub caller: &'a str,
    pub assets: &'a [u128],
    pub shares: u128,
}

pub trait Guard: Send + Sync {
    fn name(&self) -> &str;

    fn before(&self, request: &GuardRequest<'_>) -> anyhow::Result<()>;

    fn after(&self, _request: &GuardRequest<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Run every guard's `before` hook, stopping at the first rejection.
pub fn check_before(guards: &[Box<dyn Guard>], request: &GuardRequest<'_>) -> VaultResult<()> {
    for guard in guards {
        guard.before(request).map_err(|e| rejected(guard.as_ref(), e))?;
    }
    Ok(())
}

pub fn check_after(guards: &[Box<dyn Guard>], request: &GuardRequest<'_>) -> VaultResult<()> {
    for guard in guards {
        guard.after(request).map_err(|e| rejected(guard.as_ref(), e))?;
    }
    Ok(())
}

fn rejected(guard: &dyn Guard, err: anyhow::Error) -> VaultError {
    VaultError::GuardRejected {
        guard: guard.name().to_string(),
        reason: format!("{err:#}"),
    }
}

// ── Shipped guards ──────────────────────────────────────────────────

/// Only listed accounts may perform the covered request types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AllowlistGuard {
    pub accounts: BTreeSet<String>,
    pub requests: BTreeSet<RequestType>,
}

impl Guard for AllowlistGuard {
    fn name(&self) -> &str {
        "allowlist"
    }

    fn before(&self, request: &GuardRequest<'_>) -> anyhow::Result<()> {
        if self.requests.contains(&request.kind) && !self.accounts.contains(request.caller) {
            anyhow::bail!("`{}` is not allowlisted for {:?}", request.caller, request.kind);
        }
        Ok(())
    }
}

/// Caps a single deposit per asset slot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DepositLimitGuard {
    /// Maximum units per slot, keyed by slot index.
    pub max_per_slot: BTreeMap<usize, u128>,
}

impl Guard for DepositLimitGuard {
    fn name(&self) -> &str {
        "deposit-limit"
    }

    fn before(&self, request: &GuardRequest<'_>) -> anyhow::Result<()> {
        if request.kind != RequestType::Deposit {
            return Ok(());
        }
        for (slot, amount) in request.assets.iter().enumerate() {
            if let Some(max) = self.max_per_slot.get(&slot)
                && amount > max
            {
                anyhow::bail!("slot {slot} deposit {amount} exceeds limit {max}");
            }
        }
        Ok(())
    }
}
