use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::access::AccessControl;
use crate::error::{VaultError, VaultResult};
use crate::ledger::ReceiptLedger;
use crate::math::{checked_add, checked_sub};
use crate::model::{AccountId, AssetGroup, AssetRegistry, ProtocolLimits, StrategyId, VaultId};
use crate::strategy::Strategy;
use crate::vault::Vault;

/// Per-account token balance tracking, in smallest units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalances {
    inner: BTreeMap<AccountId, BTreeMap<String, u128>>,
}

impl AssetBalances {
    pub fn get(&self, account: &str, asset: &str) -> u128 {
        self.inner
            .get(account)
            .and_then(|m| m.get(asset))
            .copied()
            .unwrap_or(0)
    }

    /// Balances of `account` in the order of `group`.
    pub fn get_vec(&self, account: &str, group: &AssetGroup) -> Vec<u128> {
        group.assets.iter().map(|a| self.get(account, a)).collect()
    }

    pub fn credit(&mut self, account: &str, asset: &str, amount: u128) -> VaultResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let entry = self
            .inner
            .entry(account.to_string())
            .or_default()
            .entry(asset.to_string())
            .or_insert(0);
        *entry = checked_add(*entry, amount)?;
        Ok(())
    }

    /// Remove exactly `amount`, failing without side effects if the balance is short.
    pub fn debit(&mut self, account: &str, asset: &str, amount: u128) -> VaultResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let available = self.get(account, asset);
        if available < amount {
            return Err(VaultError::InsufficientAssets {
                account: account.to_string(),
                asset: asset.to_string(),
                requested: amount,
                available,
            });
        }
        if let Some(entry) = self.inner.get_mut(account).and_then(|m| m.get_mut(asset)) {
            *entry = checked_sub(*entry, amount)?;
        }
        Ok(())
    }

    pub fn credit_vec(&mut self, account: &str, group: &AssetGroup, amounts: &[u128]) -> VaultResult<()> {
        group.check_len(amounts)?;
        for (asset, amount) in group.assets.iter().zip(amounts) {
            self.credit(account, asset, *amount)?;
        }
        Ok(())
    }

    pub fn debit_vec(&mut self, account: &str, group: &AssetGroup, amounts: &[u128]) -> VaultResult<()> {
        group.check_len(amounts)?;
        for (asset, amount) in group.assets.iter().zip(amounts) {
            let available = self.get(account, asset);
            if available < *amount {
                return Err(VaultError::InsufficientAssets {
                    account: account.to_string(),
                    asset: asset.clone(),
                    requested: *amount,
                    available,
                });
            }
        }
        for (asset, amount) in group.assets.iter().zip(amounts) {
            self.debit(account, asset, *amount)?;
        }
        Ok(())
    }

    pub fn transfer_vec(
        &mut self,
        from: &str,
        to: &str,
        group: &AssetGroup,
        amounts: &[u128],
    ) -> VaultResult<()> {
        self.debit_vec(from, group, amounts)?;
        self.credit_vec(to, group, amounts)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, &BTreeMap<String, u128>)> {
        self.inner.iter()
    }

    /// Sum of every account's balance of `asset`.
    pub fn total(&self, asset: &str) -> u128 {
        self.inner
            .values()
            .filter_map(|m| m.get(asset))
            .sum()
    }
}

/// Everything the protocol persists. Collaborators (yield sources, oracle,
/// clock, guards) live beside it in [`super::Protocol`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolState {
    pub paused: bool,
    pub access: AccessControl,
    pub assets: AssetRegistry,
    pub limits: ProtocolLimits,
    /// Strategy arena. Slot 0 is the ghost sentinel.
    pub strategies: Vec<Strategy>,
    pub vaults: BTreeMap<VaultId, Vault>,
    pub receipts: ReceiptLedger,
    pub balances: AssetBalances,
}

impl ProtocolState {
    pub fn new(admin: &str, limits: ProtocolLimits) -> Self {
        Self {
            paused: false,
            access: AccessControl::with_admin(admin),
            assets: AssetRegistry::default(),
            limits,
            strategies: vec![Strategy::ghost()],
            vaults: BTreeMap::new(),
            receipts: ReceiptLedger::default(),
            balances: AssetBalances::default(),
        }
    }

    pub fn strategy(&self, id: StrategyId) -> VaultResult<&Strategy> {
        self.strategies
            .get(id.index())
            .ok_or(VaultError::UnknownStrategy(id))
    }

    pub fn strategy_mut(&mut self, id: StrategyId) -> VaultResult<&mut Strategy> {
        self.strategies
            .get_mut(id.index())
            .ok_or(VaultError::UnknownStrategy(id))
    }

    pub fn vault(&self, id: &str) -> VaultResult<&Vault> {
        self.vaults
            .get(id)
            .ok_or_else(|| VaultError::UnknownVault(id.to_string()))
    }

    pub fn vault_mut(&mut self, id: &str) -> VaultResult<&mut Vault> {
        self.vaults
            .get_mut(id)
            .ok_or_else(|| VaultError::UnknownVault(id.to_string()))
    }
}
