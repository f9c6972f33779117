use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::math::{add_vec, checked_add};
use crate::model::{AccountId, VaultId};

pub type ReceiptId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Deposit,
    Withdrawal,
}

/// Claim ticket on one flush round's eventual outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: ReceiptId,
    pub kind: ReceiptKind,
    pub owner: AccountId,
    pub vault: VaultId,
    /// Flush round the request was batched into.
    pub flush_index: u64,
    /// Deposited assets (deposit receipts).
    pub assets: Vec<u128>,
    /// Burned vault shares (withdrawal receipts).
    pub shares: u128,
    pub created_at: u64,
    pub claimed: bool,
}

impl Receipt {
    fn fungible_with(&self, other: &Receipt) -> bool {
        self.kind == other.kind
            && self.vault == other.vault
            && self.flush_index == other.flush_index
            && self.owner == other.owner
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptLedger {
    next_id: ReceiptId,
    receipts: BTreeMap<ReceiptId, Receipt>,
}

impl ReceiptLedger {
    /// Rebuild from persisted receipts.
    pub fn from_parts(next_id: ReceiptId, receipts: impl IntoIterator<Item = Receipt>) -> Self {
        Self {
            next_id,
            receipts: receipts.into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    pub fn next_id(&self) -> ReceiptId {
        self.next_id
    }

    pub fn issue(
        &mut self,
        kind: ReceiptKind,
        owner: &str,
        vault: &str,
        flush_index: u64,
        assets: Vec<u128>,
        shares: u128,
        now: u64,
    ) -> ReceiptId {
        self.next_id += 1;
        let id = self.next_id;
        self.receipts.insert(
            id,
            Receipt {
                id,
                kind,
                owner: owner.to_string(),
                vault: vault.to_string(),
                flush_index,
                assets,
                shares,
                created_at: now,
                claimed: false,
            },
        );
        id
    }

    pub fn get(&self, id: ReceiptId) -> VaultResult<&Receipt> {
        self.receipts.get(&id).ok_or(VaultError::UnknownReceipt(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Receipt> {
        self.receipts.values()
    }

    pub fn owned_by<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = &'a Receipt> {
        self.receipts
            .values()
            .filter(move |r| r.owner == owner && !r.claimed)
    }

    /// Check that `owner` may redeem `id`, returning the receipt.
    pub fn redeemable(&self, id: ReceiptId, owner: &str) -> VaultResult<&Receipt> {
        let receipt = self.get(id)?;
        if receipt.owner != owner {
            return Err(VaultError::NotReceiptOwner {
                account: owner.to_string(),
                receipt: id,
            });
        }
        if receipt.claimed {
            return Err(VaultError::ReceiptAlreadyClaimed(id));
        }
        Ok(receipt)
    }

    pub fn mark_claimed(&mut self, id: ReceiptId) -> VaultResult<()> {
        let receipt = self
            .receipts
            .get_mut(&id)
            .ok_or(VaultError::UnknownReceipt(id))?;
        if receipt.claimed {
            return Err(VaultError::ReceiptAlreadyClaimed(id));
        }
        receipt.claimed = true;
        Ok(())
    }

    /// Fold several receipts of one owner, vault, round and kind into a new one.
    /// The inputs are consumed.
    pub fn merge(&mut self, ids: &[ReceiptId], owner: &str, now: u64) -> VaultResult<ReceiptId> {
        let first = match ids.first() {
            Some(id) => self.redeemable(*id, owner)?.clone(),
            None => return Err(VaultError::ZeroAmount),
        };
        let mut assets = first.assets.clone();
        let mut shares = first.shares;
        for (i, id) in ids.iter().enumerate().skip(1) {
            if ids[..i].contains(id) {
                return Err(VaultError::ReceiptAlreadyClaimed(*id));
            }
            let receipt = self.redeemable(*id, owner)?;
            if !receipt.fungible_with(&first) {
                return Err(VaultError::IncompatibleReceipts);
            }
            assets = add_vec(&assets, &receipt.assets)?;
            shares = checked_add(shares, receipt.shares)?;
        }
        for id in ids {
            self.mark_claimed(*id)?;
        }
        Ok(self.issue(
            first.kind,
            owner,
            &first.vault,
            first.flush_index,
            assets,
            shares,
            now,
        ))
    }
}
