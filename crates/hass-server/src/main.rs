use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use hass_config::ConfigLoader;
use hass_migration::MigrationStrategy;
use hass_server::commands;
use hass_server::logging::init_tracing;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory containing global.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the phased schema migration
    Migrate {
        /// Line protocol or backup JSON loaded into the source store first
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Override the configured strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// Run the batch ETL only
    Etl {
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Restrict to these source measurements
        #[arg(short, long)]
        measurement: Vec<String>,

        /// Write the run summary to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Analyze schema patterns in a line protocol file
    Analyze {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Feed JSON-lines events through the live ingest pipeline
    Ingest {
        #[arg(short, long)]
        events: PathBuf,
    },
    /// Apply retention policies to the target store
    Retention {
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Ignore the cleanup interval
        #[arg(long)]
        force: bool,

        /// Keep running on the configured cron schedule
        #[arg(long)]
        schedule: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Immediate,
    Gradual,
    DualWrite,
    BlueGreen,
}

impl From<StrategyArg> for MigrationStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Immediate => MigrationStrategy::Immediate,
            StrategyArg::Gradual => MigrationStrategy::Gradual,
            StrategyArg::DualWrite => MigrationStrategy::DualWrite,
            StrategyArg::BlueGreen => MigrationStrategy::BlueGreen,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json)?;

    let loader = ConfigLoader::new(&cli.config_dir);
    let mut config = loader.load_validated()?;
    info!(config = %loader.config_path().display(), "Configuration loaded");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, cancelling");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Command::Migrate { input, strategy } => {
            if let Some(strategy) = strategy {
                config.migration.strategy = strategy.into();
            }
            let outcome = commands::run_migrate(&config, input.as_deref(), cancel).await?;
            print_json(&outcome)?;
            if !outcome.is_success() {
                bail!("migration failed");
            }
        }
        Command::Etl {
            input,
            measurement,
            report,
        } => {
            let summary =
                commands::run_etl(&config, input.as_deref(), measurement, report, cancel).await?;
            print_json(&summary)?;
            if !summary.success {
                bail!("ETL run failed");
            }
        }
        Command::Analyze { input } => {
            print_json(&commands::run_analyze(&config, &input).await?)?;
        }
        Command::Ingest { events } => {
            let report = commands::run_ingest(&config, &events, cancel).await?;
            print_json(&report.summary)?;
            print!("{}", report.prometheus);
        }
        Command::Retention {
            input,
            force,
            schedule,
        } => {
            if schedule {
                commands::run_retention_schedule(&config, cancel).await?;
            } else {
                let report = commands::run_retention_cleanup(&config, input.as_deref(), force).await?;
                print_json(&report)?;
            }
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
