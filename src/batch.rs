//! Batch accumulator: per-vault aggregation of requests between flushes,
//! and the netting arithmetic shared by flush and harvest.

use serde::{Deserialize, Serialize};

use crate::error::VaultResult;
use crate::math::{FULL_PERCENT, add_vec, checked_add, checked_sub, mul_div_down};
use crate::model::Allocation;

/// Requests collected in a vault's open round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub deposits: Vec<u128>,
    /// Vault shares burned by withdrawal requests.
    pub withdrawn_shares: u128,
}

impl Batch {
    pub fn new(asset_count: usize) -> Self {
        Self {
            deposits: vec![0; asset_count],
            withdrawn_shares: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.withdrawn_shares == 0 && self.deposits.iter().all(|d| *d == 0)
    }

    pub fn add_deposit(&mut self, amounts: &[u128]) -> VaultResult<()> {
        self.deposits = add_vec(&self.deposits, amounts)?;
        Ok(())
    }

    pub fn add_withdrawal(&mut self, shares: u128) -> VaultResult<()> {
        self.withdrawn_shares = checked_add(self.withdrawn_shares, shares)?;
        Ok(())
    }
}

/// Deposits matched against withdrawals for one strategy, per asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetFlow {
    /// Volume that never touches the yield source.
    pub matched: Vec<u128>,
    /// Unmatched deposits sent into the yield source.
    pub to_protocol: Vec<u128>,
    /// Unmatched withdrawals pulled out of the yield source.
    pub from_protocol: Vec<u128>,
}

/// Net `deposits` against `withdrawals` slot by slot. At most one of
/// `to_protocol[i]` and `from_protocol[i]` is non-zero and their sum is
/// `|deposits[i] - withdrawals[i]|`.
pub fn net_flows(deposits: &[u128], withdrawals: &[u128]) -> NetFlow {
    let mut flow = NetFlow::default();
    for (d, w) in deposits.iter().zip(withdrawals) {
        let matched = (*d).min(*w);
        flow.matched.push(matched);
        flow.to_protocol.push(d - matched);
        flow.from_protocol.push(w - matched);
    }
    flow
}

/// Split `deposits` over allocation slots, flooring every slot. Returns the
/// per-slot amounts and the undistributed dust per asset.
pub fn split_by_allocation(
    deposits: &[u128],
    allocation: &Allocation,
) -> VaultResult<(Vec<Vec<u128>>, Vec<u128>)> {
    let mut dust = deposits.to_vec();
    let mut slots = Vec::with_capacity(allocation.len());
    for slot in 0..allocation.len() {
        let pct = allocation.get(slot);
        let mut amounts = Vec::with_capacity(deposits.len());
        for (asset, total) in deposits.iter().enumerate() {
            let share = mul_div_down(*total, pct, FULL_PERCENT)?;
            dust[asset] = checked_sub(dust[asset], share)?;
            amounts.push(share);
        }
        slots.push(amounts);
    }
    Ok((slots, dust))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_flows_touch_only_the_difference() {
        let flow = net_flows(&[100, 0, 30], &[40, 25, 30]);
        assert_eq!(flow.matched, vec![40, 0, 30]);
        assert_eq!(flow.to_protocol, vec![60, 0, 0]);
        assert_eq!(flow.from_protocol, vec![0, 25, 0]);
    }

    #[test]
    fn test_split_floors_and_keeps_dust() {
        let allocation = Allocation::new(vec![6000, 3000, 1000]).unwrap();
        let (slots, dust) = split_by_allocation(&[101], &allocation).unwrap();
        assert_eq!(slots, vec![vec![60], vec![30], vec![10]]);
        assert_eq!(dust, vec![1]);
    }
}
