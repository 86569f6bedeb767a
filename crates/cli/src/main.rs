//! kaws - credential resolution and bulk S3 helpers
//!
//! Entry point: parses arguments, installs logging, loads the configuration
//! file and dispatches to a command.

mod commands;
mod exit_code;
mod output;

use anyhow::Context;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use kaws_core::{Config, ConfigManager};
use tracing_subscriber::EnvFilter;

use commands::bucket::BucketArgs;
use commands::completions::CompletionsArgs;
use commands::copy_bucket::CopyBucketArgs;
use commands::copy_key::CopyKeyArgs;
use commands::creds::CredsArgs;
use commands::exec::ExecArgs;
use commands::exists::ExistsArgs;
use commands::get::GetArgs;
use commands::purge::PurgeArgs;
use commands::put::PutArgs;
use commands::sync::SyncArgs;
use exit_code::ExitCode;
use output::{Formatter, OutputConfig};

/// Credential resolution and parallel bulk transfer helpers for AWS
#[derive(Parser, Debug)]
#[command(name = "kaws", version, about, propagate_version = true)]
struct Cli {
    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log more detail to stderr (-v debug, -vv trace); overrides RUST_LOG
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the credentials kaws would use
    Creds(CredsArgs),

    /// Run a program with the resolved credentials in its environment
    Exec(ExecArgs),

    /// Copy every object under a prefix into another bucket
    CopyBucket(CopyBucketArgs),

    /// Delete every object under a prefix
    Purge(PurgeArgs),

    /// Copy one object, in parts when it is large
    CopyKey(CopyKeyArgs),

    /// Upload a local file in parts and verify it
    Put(PutArgs),

    /// Download one object
    Get(GetArgs),

    /// Download every object under a prefix into a directory
    Sync(SyncArgs),

    /// Check whether a bucket or object exists
    Exists(ExistsArgs),

    /// Create or delete a bucket
    Bucket(BucketArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };

    let code = match cli.command {
        Commands::Completions(args) => commands::completions::execute(args, Cli::command()),
        command => match load_config() {
            Ok(config) => dispatch(command, &config, output_config).await,
            Err(e) => {
                Formatter::new(output_config).error(&format!("{e:#}"));
                ExitCode::UsageError
            }
        },
    };
    code.into()
}

async fn dispatch(command: Commands, config: &Config, output_config: OutputConfig) -> ExitCode {
    match command {
        Commands::Creds(args) => commands::creds::execute(args, config, output_config).await,
        Commands::Exec(args) => commands::exec::execute(args, config, output_config).await,
        Commands::CopyBucket(args) => {
            commands::copy_bucket::execute(args, config, output_config).await
        }
        Commands::Purge(args) => commands::purge::execute(args, config, output_config).await,
        Commands::CopyKey(args) => commands::copy_key::execute(args, config, output_config).await,
        Commands::Put(args) => commands::put::execute(args, config, output_config).await,
        Commands::Get(args) => commands::get::execute(args, config, output_config).await,
        Commands::Sync(args) => commands::sync::execute(args, config, output_config).await,
        Commands::Exists(args) => commands::exists::execute(args, config, output_config).await,
        Commands::Bucket(args) => commands::bucket::execute(args, config, output_config).await,
        Commands::Completions(args) => commands::completions::execute(args, Cli::command()),
    }
}

fn load_config() -> anyhow::Result<Config> {
    let manager = ConfigManager::new().context("Failed to locate the kaws config directory")?;
    manager
        .load()
        .with_context(|| format!("Failed to load {}", manager.config_path().display()))
}

/// Log to stderr: `-v` wins, then `RUST_LOG`, else warnings only
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["kaws", "creds", "--json", "-vv", "-e", "staging"]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Creds(args) => assert_eq!(args.aws.env.as_deref(), Some("staging")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_copy_bucket_arguments() {
        let cli = Cli::parse_from([
            "kaws",
            "copy-bucket",
            "src",
            "dst",
            "-p",
            "logs/",
            "-w",
            "4",
            "--timeout",
            "60",
            "--rw",
        ]);
        match cli.command {
            Commands::CopyBucket(args) => {
                assert_eq!(args.source, "src");
                assert_eq!(args.target, "dst");
                assert_eq!(args.prefix.as_deref(), Some("logs/"));
                assert_eq!(args.transfer.workers, Some(4));
                assert_eq!(args.transfer.timeout, Some(60));
                assert!(args.aws.rw);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_sync_arguments() {
        let cli = Cli::parse_from(["kaws", "sync", "logs", "./out", "-p", "app/", "-w", "8"]);
        match cli.command {
            Commands::Sync(args) => {
                assert_eq!(args.bucket, "logs");
                assert_eq!(args.dir, std::path::PathBuf::from("./out"));
                assert_eq!(args.prefix.as_deref(), Some("app/"));
                assert_eq!(args.transfer.workers, Some(8));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_get_destination_is_optional() {
        let cli = Cli::parse_from(["kaws", "get", "s3://logs/a.gz"]);
        match cli.command {
            Commands::Get(args) => {
                assert_eq!(args.source, "s3://logs/a.gz");
                assert_eq!(args.dest, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
