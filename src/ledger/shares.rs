use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::math::{checked_add, checked_sub};
use crate::model::AccountId;

/// Fungible share balances with a tracked total supply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLedger {
    balances: BTreeMap<AccountId, u128>,
    total_supply: u128,
}

impl ShareLedger {
    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    pub fn balance_of(&self, holder: &str) -> u128 {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    pub fn holders(&self) -> impl Iterator<Item = (&AccountId, &u128)> {
        self.balances.iter().filter(|(_, b)| **b > 0)
    }

    pub fn mint(&mut self, to: &str, amount: u128) -> VaultResult<()> {
        if amount == 0 {
            return Ok(());
        }
        self.total_supply = checked_add(self.total_supply, amount)?;
        let entry = self.balances.entry(to.to_string()).or_insert(0);
        *entry = checked_add(*entry, amount)?;
        Ok(())
    }

    pub fn burn(&mut self, from: &str, amount: u128) -> VaultResult<()> {
        if amount == 0 {
            return Ok(());
        }
        self.debit(from, amount)?;
        self.total_supply = checked_sub(self.total_supply, amount)?;
        Ok(())
    }

    pub fn transfer(&mut self, from: &str, to: &str, amount: u128) -> VaultResult<()> {
        if amount == 0 || from == to {
            return Ok(());
        }
        self.debit(from, amount)?;
        let entry = self.balances.entry(to.to_string()).or_insert(0);
        *entry = checked_add(*entry, amount)?;
        Ok(())
    }

    fn debit(&mut self, from: &str, amount: u128) -> VaultResult<()> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(VaultError::InsufficientShares {
                account: from.to_string(),
                requested: amount,
                available,
            });
        }
        let remaining = available - amount;
        if remaining == 0 {
            self.balances.remove(from);
        } else {
            self.balances.insert(from.to_string(), remaining);
        }
        Ok(())
    }
}
