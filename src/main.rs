use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod example;
mod history;
mod inspect;
mod schema;
mod simulate;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vault_flow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Schema => schema::run(),
        cli::Command::Validate { file } => vault_flow::validate::run(&file),
        cli::Command::Example => example::run(),
        cli::Command::Simulate {
            file,
            db,
            dry_run,
            output,
            verbose,
        } => simulate::run(&simulate::SimulateConfig {
            file,
            db,
            dry_run,
            output,
            verbose,
        }),
        cli::Command::Inspect { db, vault } => inspect::run(db.as_deref(), vault.as_deref()),
        cli::Command::History {
            strategy,
            db,
            output,
        } => history::run(&strategy, db.as_deref(), output.as_deref()),
    }
}
