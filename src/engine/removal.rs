use tracing::{info, warn};

use super::Protocol;
use crate::access::Role;
use crate::error::{VaultError, VaultResult};
use crate::model::StrategyId;
use crate::strategy::StrategyStatus;

/// Where a removed strategy ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Assets were pulled out right away.
    Exited { assets: Vec<u128> },
    /// Flushed flows or a pending round must finish first; the exit runs when
    /// that round is finalized.
    Draining,
}

impl Protocol {
    /// Detach a strategy from every vault and send its assets to `recipient`,
    /// who must hold the emergency-withdrawer role. Not subject to the pause
    /// switch.
    pub fn remove_strategy(&mut self, caller: &str, id: StrategyId, recipient: &str) -> VaultResult<Removal> {
        self.atomic("remove_strategy", |p| {
            p.state.access.ensure(Role::Admin, caller)?;
            p.state.access.ensure(Role::EmergencyWithdrawer, recipient)?;
            let strategy = p.state.strategy(id)?;
            if id.is_ghost() || !strategy.is_active() {
                return Err(VaultError::StrategyRemoved(id));
            }
            let group = strategy.asset_group;
            let must_drain = strategy.pending_round().is_some() || !strategy.input.is_empty();

            let mut detached = Vec::new();
            for vault in p.state.vaults.values_mut() {
                let Some(slot) = vault.slot_of(id) else {
                    continue;
                };
                vault.strategies[slot] = StrategyId::GHOST;
                vault.allocation = vault.allocation.without_slot(slot);
                detached.push(vault.id.clone());
            }
            info!(strategy = %id, vaults = ?detached, "strategy detached");

            if must_drain {
                p.state.strategy_mut(id)?.status = StrategyStatus::Draining {
                    recipient: recipient.to_string(),
                };
                warn!(strategy = %id, recipient, "strategy draining until its round is finalized");
                return Ok(Removal::Draining);
            }
            let pricing = p.pricing(group)?;
            let assets = p.with_strategy(id, &pricing, |s, ctx| s.emergency_exit(ctx, recipient))?;
            Ok(Removal::Exited { assets })
        })
    }
}
