use serde::{Deserialize, Serialize};
use tracing::info;

use super::Protocol;
use super::state::ProtocolState;
use crate::error::{VaultError, VaultResult};
use crate::guard::{GuardRequest, RequestType, check_after, check_before};
use crate::ledger::{ReceiptId, ReceiptKind};
use crate::math::{checked_sub, mul_div_down};
use crate::model::{ESCROW, MASTER_WALLET};

/// What a claimed receipt paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Claimed {
    Shares { receipt: ReceiptId, vault: String, shares: u128 },
    Assets { receipt: ReceiptId, vault: String, assets: Vec<u128> },
}

impl Protocol {
    /// Redeem a synced receipt: vault shares for deposits, assets for
    /// withdrawals.
    pub fn claim(&mut self, caller: &str, receipt: ReceiptId) -> VaultResult<Claimed> {
        self.transact("claim", |p| p.claim_inner(caller, receipt))
    }

    /// Claim every ready receipt the caller holds in `vault`.
    pub fn claim_all(&mut self, caller: &str, vault: &str) -> VaultResult<Vec<Claimed>> {
        self.transact("claim_all", |p| {
            p.sync_pending(vault)?;
            let ready: Vec<ReceiptId> = p
                .claimable(caller)
                .into_iter()
                .filter(|c| c.ready && c.receipt.vault == vault)
                .map(|c| c.receipt.id)
                .collect();
            ready.into_iter().map(|id| p.claim_inner(caller, id)).collect()
        })
    }

    fn claim_inner(&mut self, caller: &str, id: ReceiptId) -> VaultResult<Claimed> {
        let receipt = self.state.receipts.redeemable(id, caller)?.clone();
        self.sync_pending(&receipt.vault)?;
        let vault = self.state.vault(&receipt.vault)?;
        if vault.next_sync <= receipt.flush_index {
            return Err(VaultError::ReceiptNotSynced {
                receipt: id,
                vault: receipt.vault.clone(),
                flush: receipt.flush_index,
            });
        }
        let request = GuardRequest {
            kind: RequestType::Claim,
            vault: &receipt.vault,
            caller,
            assets: &receipt.assets,
            shares: receipt.shares,
        };
        check_before(self.guards_of(&receipt.vault), &request)?;

        let ProtocolState {
            vaults,
            receipts,
            balances,
            assets,
            ..
        } = &mut self.state;
        let vault = vaults
            .get_mut(&receipt.vault)
            .ok_or_else(|| VaultError::UnknownVault(receipt.vault.clone()))?;
        let group = assets.group(vault.asset_group)?;
        let record = vault
            .flushes
            .get_mut(&receipt.flush_index)
            .ok_or_else(|| VaultError::ReceiptNotSynced {
                receipt: id,
                vault: receipt.vault.clone(),
                flush: receipt.flush_index,
            })?;

        let claimed = match receipt.kind {
            ReceiptKind::Deposit => {
                let value = record.pricing.value(&receipt.assets)?;
                // Merged receipts can round a unit above what was recorded at flush.
                let shares = if value >= record.unclaimed_deposit_value {
                    record.unclaimed_escrow
                } else {
                    mul_div_down(record.unclaimed_escrow, value, record.unclaimed_deposit_value)?
                };
                record.unclaimed_escrow = checked_sub(record.unclaimed_escrow, shares)?;
                record.unclaimed_deposit_value = record.unclaimed_deposit_value.saturating_sub(value);
                vault.shares.transfer(ESCROW, caller, shares)?;
                Claimed::Shares {
                    receipt: id,
                    vault: receipt.vault.clone(),
                    shares,
                }
            }
            ReceiptKind::Withdrawal => {
                let mut out = group.zeros();
                if record.unclaimed_withdrawn_shares > 0 {
                    for (paid, left) in out.iter_mut().zip(record.unclaimed_assets.iter_mut()) {
                        *paid = mul_div_down(*left, receipt.shares, record.unclaimed_withdrawn_shares)?;
                        *left -= *paid;
                    }
                    record.unclaimed_withdrawn_shares =
                        checked_sub(record.unclaimed_withdrawn_shares, receipt.shares)?;
                }
                balances.transfer_vec(MASTER_WALLET, caller, group, &out)?;
                Claimed::Assets {
                    receipt: id,
                    vault: receipt.vault.clone(),
                    assets: out,
                }
            }
        };
        receipts.mark_claimed(id)?;

        check_after(self.guards_of(&receipt.vault), &request)?;
        info!(account = caller, receipt = id, vault = %receipt.vault, ?claimed, "receipt claimed");
        Ok(claimed)
    }
}
