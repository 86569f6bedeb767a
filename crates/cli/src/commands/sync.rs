//! sync command - Download every object under a prefix into a local directory
//!
//! With a prefix ending in `/` (or none) the key layout below the prefix is
//! mirrored; with any other prefix only file names are kept. Local files that
//! already have the object's size are skipped.

use std::path::PathBuf;

use clap::Args;
use kaws_core::{BulkEngine, BulkSummary, Config};
use serde::Serialize;
use tokio::sync::mpsc;

use super::aws_args::AwsArgs;
use super::copy_bucket::{FailureOutput, TransferArgs, failures, watch_progress};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Download all objects under a prefix
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Bucket to download from
    pub bucket: String,

    /// Local directory (created if missing)
    pub dir: PathBuf,

    /// Only download keys starting with this prefix
    #[arg(short = 'p', long)]
    pub prefix: Option<String>,

    #[command(flatten)]
    pub transfer: TransferArgs,

    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Debug, Serialize)]
struct SyncOutput {
    bucket: String,
    prefix: Option<String>,
    dir: String,
    success: bool,
    #[serde(flatten)]
    summary: BulkSummary,
    failures: Vec<FailureOutput>,
}

/// Execute the sync command
pub async fn execute(args: SyncArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    if args.dir.exists() && !args.dir.is_dir() {
        formatter.error(&format!("{} is not a directory", args.dir.display()));
        return ExitCode::UsageError;
    }

    let store = match args.aws.connect(config, &formatter).await {
        Ok(store) => store,
        Err(code) => return code,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let engine = BulkEngine::new(store, args.transfer.bulk_options(config).with_status(tx));

    let objects = match engine.worklist(&args.bucket, args.prefix.as_deref()).await {
        Ok(objects) => objects,
        Err(e) => {
            formatter.error(&format!("Failed to list {}: {e}", args.bucket));
            return ExitCode::from(&e);
        }
    };

    let progress = formatter.progress(objects.len() as u64, "Downloading...");
    let watcher = watch_progress(rx, progress.clone());

    let report = engine
        .download_objects(objects, &args.bucket, args.prefix.as_deref(), &args.dir)
        .await;
    drop(engine);
    let _ = watcher.await;
    if let Some(pb) = progress {
        pb.finish_with_message("Done");
    }

    let output = SyncOutput {
        bucket: args.bucket,
        prefix: args.prefix,
        dir: args.dir.display().to_string(),
        success: report.success(),
        summary: report.summary(),
        failures: failures(&report),
    };

    if formatter.is_json() {
        formatter.json(&output);
    } else {
        for failure in &output.failures {
            formatter.error(&format!("{}: {}", failure.key, failure.reason));
        }
        let summary = &output.summary;
        let message = format!(
            "Sync complete: {} downloaded, {} skipped, {} failed, {} timed out",
            summary.downloaded, summary.skipped, summary.failed, summary.timed_out
        );
        if output.success {
            formatter.success(&message);
        } else {
            formatter.println(&message);
        }
    }

    if output.success {
        ExitCode::Success
    } else {
        ExitCode::GeneralError
    }
}
