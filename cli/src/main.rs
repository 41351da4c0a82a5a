//! splitter: run scripted sessions against a value-splitting ledger.

mod script;

use clap::Parser;
use std::path::PathBuf;

use splitter_ledger::LedgerConfig;
use splitter_utils::{init_tracing_with, LogFormat};

use crate::script::{run_session, SessionScript};

#[derive(Parser)]
#[command(name = "splitter", about = "Value-splitting escrow ledger simulator")]
struct Cli {
    /// Path to the ledger's TOML configuration (owner, recipients, policies).
    #[arg(long, env = "SPLITTER_CONFIG")]
    config: PathBuf,

    /// Log level: "trace", "debug", "info", "warn", "error".
    /// Overrides the config file; `RUST_LOG` overrides both.
    #[arg(long, env = "SPLITTER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json". Overrides the config file.
    #[arg(long, env = "SPLITTER_LOG_FORMAT")]
    log_format: Option<String>,

    /// Subcommand.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Deploy a ledger, apply a session script and print the report as JSON.
    Run {
        /// Path to the TOML session script.
        #[arg(long)]
        script: PathBuf,

        /// Pretty-print the JSON report.
        #[arg(long)]
        pretty: bool,
    },
    /// Print the effective configuration as TOML.
    ShowConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = LedgerConfig::from_toml_file(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    let format: LogFormat = config.log_format.parse().map_err(anyhow::Error::msg)?;
    init_tracing_with(&config.log_level, format);
    tracing::debug!("Loaded config from {}", cli.config.display());

    match cli.command {
        Command::Run { script, pretty } => {
            let session = SessionScript::from_toml_file(&script)?;
            tracing::info!(
                "Running {} steps from {} against ledger owned by {}",
                session.step.len(),
                script.display(),
                config.owner,
            );
            let report = run_session(&config, &session);
            let json = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{json}");
            if !report.replay_consistent {
                anyhow::bail!("replayed history does not match live ledger state");
            }
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
