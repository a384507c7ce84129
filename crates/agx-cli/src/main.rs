//! # agx CLI entry point
//!
//! Parses arguments, sets up logging, loads configuration, and dispatches
//! to the subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use agx_cli::attest::{run_attest, AttestArgs};
use agx_cli::config::AgxConfig;
use agx_cli::keys::{run_keys, KeysArgs};
use agx_cli::queue::{run_queue, QueueArgs};
use agx_cli::worker::{run_worker, WorkerArgs};

/// AGX operator CLI.
///
/// Runs the projection worker and retry loop, manages the pending-update
/// queue, and signs attestations offline.
#[derive(Parser, Debug)]
#[command(name = "agx", version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow the ledger, project events, and deliver queued state updates.
    Worker(WorkerArgs),

    /// Inspect and recover pending state updates.
    Queue(QueueArgs),

    /// Sign an attestation with the configured attestor key.
    Attest(AttestArgs),

    /// Attestor key utilities.
    Keys(KeysArgs),
}

fn filter(verbose: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    match verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter(cli.verbose))
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter(cli.verbose))
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match &cli.command {
        Commands::Keys(args) => run_keys(args),
        command => match AgxConfig::load(cli.config.as_deref()) {
            Ok(config) => {
                tracing::debug!(?config, "configuration loaded");
                match command {
                    Commands::Worker(args) => run_worker(args, &config).await,
                    Commands::Queue(args) => run_queue(args, &config).await,
                    Commands::Attest(args) => run_attest(args, &config).await,
                    Commands::Keys(args) => run_keys(args),
                }
            }
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_cli::queue::QueueCommand;

    #[test]
    fn worker_flags() {
        let cli = Cli::try_parse_from(["agx", "worker", "--mock", "--once"]).unwrap();
        match cli.command {
            Commands::Worker(args) => {
                assert!(args.mock);
                assert!(args.once);
                assert!(args.from_block.is_none());
            }
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn queue_dismiss_takes_id_and_note() {
        let id = "6f1c2b1e-8a5d-4f7e-9d0b-3c2a1e4f5d6c";
        let cli = Cli::try_parse_from(["agx", "queue", "dismiss", "--id", id, "--note", "duplicate"]).unwrap();
        match cli.command {
            Commands::Queue(args) => match args.command {
                QueueCommand::Dismiss { id: parsed, note } => {
                    assert_eq!(parsed.to_string(), id);
                    assert_eq!(note, "duplicate");
                }
                other => panic!("parsed {other:?}"),
            },
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn queue_retry_rejects_malformed_id() {
        assert!(Cli::try_parse_from(["agx", "queue", "retry", "--id", "nope"]).is_err());
    }

    #[test]
    fn attest_state_code_is_range_checked() {
        assert!(Cli::try_parse_from(["agx", "attest", "state-update", "--shipment", "S1", "--state", "3"]).is_ok());
        assert!(Cli::try_parse_from(["agx", "attest", "state-update", "--shipment", "S1", "--state", "8"]).is_err());
    }

    #[test]
    fn attest_kyc_parses_role_and_address() {
        let cli = Cli::try_parse_from([
            "agx",
            "attest",
            "kyc",
            "--participant",
            "0x0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c",
            "--role",
            "transporter",
            "--meta-data-hash",
            "Qm-kyc",
        ]);
        assert!(cli.is_ok());
        assert!(Cli::try_parse_from([
            "agx",
            "attest",
            "kyc",
            "--participant",
            "0x0c",
            "--role",
            "transporter",
            "--meta-data-hash",
            "Qm-kyc",
        ])
        .is_err());
    }

    #[test]
    fn global_flags() {
        let cli = Cli::try_parse_from(["agx", "-vv", "--log-json", "--config", "agx.yaml", "keys", "generate"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.log_json);
        assert_eq!(cli.config, Some(PathBuf::from("agx.yaml")));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["agx"]).is_err());
    }
}
