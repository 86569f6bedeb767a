//! exists command - Check whether a bucket or an object exists
//!
//! Exits 0 when it does and with the not-found code when it doesn't, so the
//! command can drive shell conditionals.

use clap::Args;
use kaws_core::{Config, ObjectPath, ObjectStore as _};
use serde::Serialize;

use super::aws_args::AwsArgs;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Check for a bucket or object
#[derive(Args, Debug)]
pub struct ExistsArgs {
    /// Bucket name, or an object as s3://bucket/key
    pub target: String,

    #[command(flatten)]
    pub aws: AwsArgs,
}

/// What `target` names
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Bucket(String),
    Object(ObjectPath),
}

impl Target {
    fn parse(value: &str) -> Option<Self> {
        let bare = value.strip_prefix("s3://").unwrap_or(value);
        match bare.strip_suffix('/').unwrap_or(bare) {
            "" => None,
            bucket if !bucket.contains('/') => Some(Target::Bucket(bucket.to_string())),
            _ => ObjectPath::parse(value).map(Target::Object),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExistsOutput {
    target: String,
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
}

/// Execute the exists command
pub async fn execute(args: ExistsArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let Some(target) = Target::parse(&args.target) else {
        formatter.error(&format!(
            "Invalid target '{}', expected a bucket or s3://bucket/key",
            args.target
        ));
        return ExitCode::UsageError;
    };

    let store = match args.aws.connect(config, &formatter).await {
        Ok(store) => store,
        Err(code) => return code,
    };

    let result = match &target {
        Target::Bucket(bucket) => store.bucket_exists(bucket).await.map(|exists| (exists, None)),
        Target::Object(path) => store
            .head_object(path)
            .await
            .map(|info| (info.is_some(), info.map(|i| i.size))),
    };

    let (exists, size_bytes) = match result {
        Ok(found) => found,
        Err(e) => {
            formatter.error(&format!("Failed to check {}: {e}", args.target));
            return ExitCode::from(&e);
        }
    };

    let output = ExistsOutput {
        target: args.target,
        exists,
        size_bytes,
    };
    if formatter.is_json() {
        formatter.json(&output);
    } else if exists {
        formatter.success(&format!("{} exists", formatter.style_name(&output.target)));
    } else {
        formatter.println(&format!("{} does not exist", output.target));
    }

    if exists {
        ExitCode::Success
    } else {
        ExitCode::NotFound
    }
}
