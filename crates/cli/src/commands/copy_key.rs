//! copy-key command - Server-side copy of one object, in parts when large

use clap::Args;
use kaws_core::{
    ChunkedCopyOptions, Config, ObjectPath, ObjectStore as _, RetryBuilder, copy_object_chunked,
};
use serde::Serialize;

use super::aws_args::AwsArgs;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Copy a single object
#[derive(Args, Debug)]
pub struct CopyKeyArgs {
    /// Source object (s3://bucket/key or bucket/key)
    pub source: String,

    /// Destination object (s3://bucket/key or bucket/key)
    pub target: String,

    #[command(flatten)]
    pub parts: PartArgs,

    #[command(flatten)]
    pub aws: AwsArgs,
}

/// Multipart tuning flags, overriding the `[transfer]` configuration
#[derive(Args, Debug, Clone, Default)]
pub struct PartArgs {
    /// Part size in bytes
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Parts transferred concurrently
    #[arg(short = 'P', long)]
    pub parallel: Option<usize>,

    /// Attempts per part
    #[arg(long)]
    pub retries: Option<u32>,

    /// Leave a failed multipart upload open instead of aborting it
    #[arg(long)]
    pub keep_upload: bool,
}

impl PartArgs {
    pub fn copy_options(&self, config: &Config) -> ChunkedCopyOptions {
        let transfer = &config.transfer;
        ChunkedCopyOptions {
            part_size: self.part_size.unwrap_or(transfer.part_size),
            retry: RetryBuilder::new()
                .max_attempts(self.retries.unwrap_or(transfer.retries_per_part))
                .build(),
            parallel: self.parallel.unwrap_or(transfer.parallel).max(1),
            abort_on_failure: !self.keep_upload,
        }
    }
}

#[derive(Debug, Serialize)]
struct CopyKeyOutput {
    source: String,
    target: String,
    size_bytes: u64,
    size_human: String,
    parts: usize,
}

/// Parse an object argument, reporting a usage error
pub fn parse_object(value: &str, formatter: &Formatter) -> Result<ObjectPath, ExitCode> {
    ObjectPath::parse(value).ok_or_else(|| {
        formatter.error(&format!(
            "Invalid object path '{value}', expected s3://bucket/key"
        ));
        ExitCode::UsageError
    })
}

/// Execute the copy-key command
pub async fn execute(args: CopyKeyArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let (src, dst) = match (
        parse_object(&args.source, &formatter),
        parse_object(&args.target, &formatter),
    ) {
        (Ok(src), Ok(dst)) => (src, dst),
        (Err(code), _) | (_, Err(code)) => return code,
    };

    let options = args.parts.copy_options(config);
    if options.part_size == 0 {
        formatter.error("Part size must be greater than zero");
        return ExitCode::UsageError;
    }

    let store = match args.aws.connect(config, &formatter).await {
        Ok(store) => store,
        Err(code) => return code,
    };

    let size = match store.head_object(&src).await {
        Ok(Some(info)) => info.size,
        Ok(None) => {
            formatter.error(&format!("{src} does not exist"));
            return ExitCode::NotFound;
        }
        Err(e) => {
            formatter.error(&format!("Failed to read {src}: {e}"));
            return ExitCode::from(&e);
        }
    };

    match copy_object_chunked(store.as_ref(), &src, size, &dst, &options).await {
        Ok(parts) => {
            let output = CopyKeyOutput {
                source: src.to_string(),
                target: dst.to_string(),
                size_bytes: size,
                size_human: humansize::format_size(size, humansize::BINARY),
                parts,
            };
            if formatter.is_json() {
                formatter.json(&output);
            } else {
                formatter.success(&format!(
                    "{} -> {} ({}, {} part(s))",
                    formatter.style_name(&output.source),
                    formatter.style_name(&output.target),
                    formatter.style_size(size),
                    parts
                ));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to copy {src}: {e}"));
            ExitCode::from(&e)
        }
    }
}
