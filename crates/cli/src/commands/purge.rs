//! purge command - Delete every object under a prefix

use clap::Args;
use kaws_core::{BulkEngine, BulkSummary, Config};
use serde::Serialize;
use tokio::sync::mpsc;

use super::aws_args::AwsArgs;
use super::copy_bucket::{FailureOutput, TransferArgs, failures, watch_progress};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Delete all objects in a bucket
#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Bucket to empty
    pub bucket: String,

    /// Only delete keys starting with this prefix
    #[arg(short = 'p', long)]
    pub prefix: Option<String>,

    /// List what would be deleted without deleting it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub transfer: TransferArgs,

    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Debug, Serialize)]
struct PurgeOutput {
    bucket: String,
    prefix: Option<String>,
    dry_run: bool,
    success: bool,
    #[serde(flatten)]
    summary: BulkSummary,
    failures: Vec<FailureOutput>,
}

/// Execute the purge command
pub async fn execute(args: PurgeArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

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

    if args.dry_run {
        let total_size: u64 = objects.iter().map(|o| o.size).sum();
        if formatter.is_json() {
            formatter.json(&PurgeOutput {
                bucket: args.bucket,
                prefix: args.prefix,
                dry_run: true,
                success: true,
                summary: BulkSummary {
                    total: objects.len(),
                    ..Default::default()
                },
                failures: Vec::new(),
            });
        } else {
            for object in &objects {
                formatter.println(&format!("  - {} ({})", object.key, formatter.style_size(object.size)));
            }
            formatter.println(&format!(
                "Would delete {} object(s), {}",
                objects.len(),
                formatter.style_size(total_size)
            ));
        }
        return ExitCode::Success;
    }

    let progress = formatter.progress(objects.len() as u64, "Deleting...");
    let watcher = watch_progress(rx, progress.clone());

    let report = engine.delete_objects(objects, &args.bucket).await;
    drop(engine);
    let _ = watcher.await;
    if let Some(pb) = progress {
        pb.finish_with_message("Done");
    }

    let output = PurgeOutput {
        bucket: args.bucket,
        prefix: args.prefix,
        dry_run: false,
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
            "Purge complete: {} deleted, {} failed, {} timed out",
            summary.deleted, summary.failed, summary.timed_out
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
