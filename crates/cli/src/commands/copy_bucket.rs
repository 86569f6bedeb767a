//! copy-bucket command - Copy every object under a prefix to another bucket
//!
//! Keys keep their names. Objects that already exist at the destination with
//! the same size are skipped, so an interrupted copy can simply be rerun.

use std::time::Duration;

use clap::Args;
use indicatif::ProgressBar;
use kaws_core::{BulkEngine, BulkOptions, BulkReport, BulkSummary, Config, TaskReport};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::aws_args::AwsArgs;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Copy all objects from one bucket to another
#[derive(Args, Debug)]
pub struct CopyBucketArgs {
    /// Source bucket
    pub source: String,

    /// Destination bucket
    pub target: String,

    /// Only copy keys starting with this prefix
    #[arg(short = 'p', long)]
    pub prefix: Option<String>,

    #[command(flatten)]
    pub transfer: TransferArgs,

    #[command(flatten)]
    pub aws: AwsArgs,
}

/// Bulk tuning flags, overriding the `[transfer]` configuration
#[derive(Args, Debug, Clone, Default)]
pub struct TransferArgs {
    /// Number of concurrent tasks
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Seconds before a single key's task is cancelled
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl TransferArgs {
    pub fn bulk_options(&self, config: &Config) -> BulkOptions {
        let mut options = BulkOptions::from_config(&config.transfer, &config.retry);
        if let Some(workers) = self.workers {
            options.workers = workers;
        }
        if let Some(secs) = self.timeout {
            options.task_timeout = Duration::from_secs(secs);
        }
        options
    }
}

/// Failed key in command output
#[derive(Debug, Serialize)]
pub struct FailureOutput {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
struct CopyBucketOutput {
    source: String,
    target: String,
    prefix: Option<String>,
    success: bool,
    #[serde(flatten)]
    summary: BulkSummary,
    failures: Vec<FailureOutput>,
}

/// Execute the copy-bucket command
pub async fn execute(args: CopyBucketArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let store = match args.aws.connect(config, &formatter).await {
        Ok(store) => store,
        Err(code) => return code,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let engine = BulkEngine::new(store, args.transfer.bulk_options(config).with_status(tx));

    let objects = match engine.worklist(&args.source, args.prefix.as_deref()).await {
        Ok(objects) => objects,
        Err(e) => {
            formatter.error(&format!("Failed to list {}: {e}", args.source));
            return ExitCode::from(&e);
        }
    };

    let progress = formatter.progress(objects.len() as u64, "Copying...");
    let watcher = watch_progress(rx, progress.clone());

    let report = engine.copy_objects(objects, &args.source, &args.target).await;
    // Dropping the engine closes the status channel and ends the watcher
    drop(engine);
    let _ = watcher.await;
    if let Some(pb) = progress {
        pb.finish_with_message("Done");
    }

    let output = CopyBucketOutput {
        source: args.source,
        target: args.target,
        prefix: args.prefix,
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
            "Copy complete: {} copied, {} skipped, {} failed, {} timed out",
            summary.copied, summary.skipped, summary.failed, summary.timed_out
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

/// Advance `progress` for every finished task until the channel closes
pub fn watch_progress(
    mut rx: mpsc::UnboundedReceiver<TaskReport>,
    progress: Option<ProgressBar>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            if let Some(pb) = &progress {
                if !task.outcome.is_success() {
                    pb.println(format!("✗ {}: {}", task.key, task.outcome));
                }
                pb.inc(1);
            }
        }
    })
}

pub fn failures(report: &BulkReport) -> Vec<FailureOutput> {
    report
        .failures()
        .map(|task| FailureOutput {
            key: task.key.clone(),
            reason: task.outcome.to_string(),
        })
        .collect()
}
