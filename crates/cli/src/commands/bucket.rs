//! bucket command - Create and delete buckets

use clap::{Args, Subcommand};
use kaws_core::{Config, ObjectStore as _};
use serde::Serialize;

use super::aws_args::AwsArgs;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Bucket management
#[derive(Args, Debug)]
pub struct BucketArgs {
    #[command(subcommand)]
    pub action: BucketAction,

    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Subcommand, Debug)]
pub enum BucketAction {
    /// Create a bucket in the selected region
    Create {
        /// Bucket name
        name: String,
    },

    /// Delete an empty bucket
    Delete {
        /// Bucket name
        name: String,
    },
}

#[derive(Debug, Serialize)]
struct BucketOutput {
    bucket: String,
    action: &'static str,
    #[serde(skip)]
    verb: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
}

/// Execute the bucket command
pub async fn execute(args: BucketArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let store = match args.aws.connect(config, &formatter).await {
        Ok(store) => store,
        Err(code) => return code,
    };

    let (output, result) = match args.action {
        BucketAction::Create { name } => {
            let region = args.aws.resolve_options(config).region;
            let result = store.create_bucket(&name, region.clone()).await;
            (
                BucketOutput {
                    bucket: name,
                    action: "created",
                    verb: "create",
                    region,
                },
                result,
            )
        }
        BucketAction::Delete { name } => {
            let result = store.delete_bucket(&name).await;
            (
                BucketOutput {
                    bucket: name,
                    action: "deleted",
                    verb: "delete",
                    region: None,
                },
                result,
            )
        }
    };

    match result {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&output);
            } else {
                formatter.success(&format!(
                    "Bucket {} {}",
                    formatter.style_name(&output.bucket),
                    output.action
                ));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to {} bucket {}: {e}", output.verb, output.bucket));
            ExitCode::from(&e)
        }
    }
}
