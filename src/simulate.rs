use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use vault_flow::engine::clock::Clock;
use vault_flow::scenario::runner::format_usd;
use vault_flow::scenario::{ScenarioRun, StepRecord};
use vault_flow::store::{SqliteStore, StateStore};
use vault_flow::validate;

use crate::config;

pub struct SimulateConfig {
    pub file: PathBuf,
    pub db: Option<PathBuf>,
    pub dry_run: bool,
    pub output: Option<PathBuf>,
    pub verbose: bool,
}

/// CLI entry point for the `simulate` subcommand.
pub fn run(config: &SimulateConfig) -> Result<()> {
    let scenario = validate::load_and_validate(&config.file).map_err(|errors| {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::anyhow!("Scenario validation failed:\n  {}", msgs.join("\n  "))
    })?;

    let mut sim = ScenarioRun::setup(&scenario)?;

    let pb = indicatif::ProgressBar::new(scenario.steps.len() as u64);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("  Steps [{bar:40}] {pos}/{len} {msg}")
            .context("progress template")?,
    );
    if config.verbose {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let mut records = Vec::with_capacity(scenario.steps.len());
    for (index, spec) in scenario.steps.iter().enumerate() {
        pb.set_message(spec.step.action());
        let record = sim.replay_step(index, spec)?;
        if config.verbose {
            print_record(&record);
        }
        records.push(record);
        pb.inc(1);
    }
    pb.finish_and_clear();

    print_summary(&scenario.name, &sim, &records)?;

    if let Some(ref output) = config.output {
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;
        println!("  Step records written to {}", output.display());
    }

    if config.dry_run {
        println!("  Dry run: state not saved.");
        return Ok(());
    }

    let path = config::db_path(config.db.as_deref());
    let mut store = SqliteStore::open(&path)?;
    store.clear()?;
    let written = sim.protocol.persist(&mut store)?;
    store.put_batch(&[
        (config::RATES_KEY.to_string(), serde_json::to_string(&sim.oracle.rates())?),
        (config::NOW_KEY.to_string(), sim.clock.now().to_string()),
    ])?;
    info!(path = %path.display(), keys = written, "simulation state saved");
    println!("  State saved to {} ({written} keys).", path.display());
    Ok(())
}

fn print_record(record: &StepRecord) {
    let mark = if record.ok { "ok" } else { "expected error" };
    println!(
        "  [{:>3}] {:<16} {:<14} {}",
        record.index, record.action, mark, record.outcome
    );
}

fn print_summary(name: &str, sim: &ScenarioRun, records: &[StepRecord]) -> Result<()> {
    let state = sim.protocol.state();
    println!("\n{}", "═".repeat(96));
    println!("  Scenario: {name}");
    println!("{}", "═".repeat(96));
    println!(
        "  {:<20} {:>16} {:>20} {:>10} {:>10} {:>10}",
        "Vault", "Value (USD)", "Supply", "Flushes", "Synced", "Open batch"
    );
    println!("  {}", "-".repeat(90));
    for (id, vault) in &state.vaults {
        let value = sim.protocol.vault_value(id)?;
        println!(
            "  {:<20} {:>16} {:>20} {:>10} {:>10} {:>10}",
            id,
            format_usd(value),
            vault.shares.total_supply(),
            vault.flush_index,
            vault.next_sync,
            if vault.batch.is_empty() { "no" } else { "yes" },
        );
    }
    println!("{}", "═".repeat(96));
    let failed = records.iter().filter(|r| !r.ok).count();
    println!(
        "  {} steps, {} expected failures, clock at {}",
        records.len(),
        failed,
        sim.clock.now()
    );
    Ok(())
}
