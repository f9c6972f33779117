use std::path::Path;

use anyhow::Result;

use vault_flow::model::vault_holder;
use vault_flow::scenario::runner::format_usd;
use vault_flow::strategy::StrategyStatus;

use crate::config;

/// CLI entry point for the `inspect` subcommand.
pub fn run(db: Option<&Path>, only_vault: Option<&str>) -> Result<()> {
    let path = config::db_path(db);
    let protocol = config::load(&path)?;
    let state = protocol.state();

    println!("\n{}", "═".repeat(100));
    println!(
        "  {} at t={}{}",
        path.display(),
        protocol.now(),
        if protocol.is_paused() { " (paused)" } else { "" }
    );
    println!("{}", "═".repeat(100));

    for (id, vault) in &state.vaults {
        if only_vault.is_some_and(|v| v != id) {
            continue;
        }
        let value = protocol.vault_value(id)?;
        println!(
            "  Vault `{id}` owner={} supply={} value=${} flush={} next_sync={}",
            vault.owner,
            vault.shares.total_supply(),
            format_usd(value),
            vault.flush_index,
            vault.next_sync,
        );
        println!(
            "    {:<4} {:<24} {:>8} {:>24} {:>10} {:>12}",
            "Slot", "Strategy", "Alloc", "Strategy shares", "DHW", "Last APY"
        );
        let holder = vault_holder(id);
        for (slot, sid) in vault.strategies.iter().enumerate() {
            let strategy = protocol.strategy(*sid)?;
            let name = if sid.is_ghost() { "(removed)" } else { strategy.name.as_str() };
            println!(
                "    {:<4} {:<24} {:>8} {:>24} {:>10} {:>12}",
                slot,
                name,
                vault.allocation.get(slot),
                strategy.shares.balance_of(&holder),
                vault.synced_dhw.get(slot).copied().flatten().map_or("-".to_string(), |i| i.to_string()),
                strategy.last_apy(),
            );
        }
        println!("  {}", "-".repeat(96));
    }

    if only_vault.is_none() {
        println!("  Strategies:");
        for strategy in state.strategies.iter().skip(1) {
            let status = match &strategy.status {
                StrategyStatus::Active => "active".to_string(),
                StrategyStatus::Draining { recipient } => format!("draining to {recipient}"),
                StrategyStatus::Removed => "removed".to_string(),
            };
            println!(
                "    {:>3} {:<24} {:<24} dhw={} pending={:?} supply={}",
                strategy.id,
                strategy.name,
                status,
                strategy.dhw_index,
                strategy.pending_round(),
                strategy.shares.total_supply(),
            );
        }
        println!("  Open receipts: {}", state.receipts.iter().filter(|r| !r.claimed).count());
    }
    println!("{}", "═".repeat(100));
    Ok(())
}
