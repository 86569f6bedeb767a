//! get command - Download one object to a local file

use std::path::{Path, PathBuf};

use clap::Args;
use kaws_core::{
    Config, ObjectPath, RetryBuilder, download_object, is_retryable_error, retry_with_backoff,
};
use serde::Serialize;

use super::aws_args::AwsArgs;
use super::copy_key::parse_object;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Download a single object
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Source object (s3://bucket/key or bucket/key)
    pub source: String,

    /// Local file or directory (defaults to the key's file name in the current directory)
    pub dest: Option<PathBuf>,

    /// Attempts before giving up
    #[arg(long)]
    pub retries: Option<u32>,

    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(Debug, Serialize)]
struct GetOutput {
    source: String,
    path: String,
    size_bytes: u64,
    size_human: String,
}

/// Local file for `src`: `dest` itself, or the key's file name inside it
/// when `dest` is a directory
fn destination(src: &ObjectPath, dest: Option<&Path>) -> Option<PathBuf> {
    let name = src.key.rsplit('/').next().filter(|name| !name.is_empty());
    match dest {
        Some(dest) if dest.is_dir() || dest.as_os_str().to_string_lossy().ends_with('/') => {
            name.map(|name| dest.join(name))
        }
        Some(dest) => Some(dest.to_path_buf()),
        None => name.map(PathBuf::from),
    }
}

/// Execute the get command
pub async fn execute(args: GetArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let src = match parse_object(&args.source, &formatter) {
        Ok(src) => src,
        Err(code) => return code,
    };

    let Some(path) = destination(&src, args.dest.as_deref()) else {
        formatter.error(&format!("{src} has no file name, give a destination file"));
        return ExitCode::UsageError;
    };

    let store = match args.aws.connect(config, &formatter).await {
        Ok(store) => store,
        Err(code) => return code,
    };

    let retry = RetryBuilder::new()
        .max_attempts(args.retries.unwrap_or(config.transfer.retries_per_part))
        .build();
    let result = retry_with_backoff(
        &retry,
        || download_object(store.as_ref(), &src, &path),
        is_retryable_error,
    )
    .await;

    match result {
        Ok(size) => {
            let output = GetOutput {
                source: src.to_string(),
                path: path.display().to_string(),
                size_bytes: size,
                size_human: humansize::format_size(size, humansize::BINARY),
            };
            if formatter.is_json() {
                formatter.json(&output);
            } else {
                formatter.success(&format!(
                    "{} -> {} ({})",
                    formatter.style_name(&output.source),
                    formatter.style_name(&output.path),
                    formatter.style_size(size)
                ));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to download {src}: {e}"));
            ExitCode::from(&e)
        }
    }
}
