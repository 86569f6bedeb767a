//! put command - Multipart upload of a local file with integrity check

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use kaws_core::{Config, UploadOptions, Verify, upload_file};
use serde::Serialize;

use super::aws_args::AwsArgs;
use super::copy_key::{PartArgs, parse_object};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Upload a local file
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local file
    pub file: PathBuf,

    /// Destination object (s3://bucket/key or bucket/key)
    pub target: String,

    /// How to confirm the upload landed intact
    #[arg(long, value_enum, default_value_t = VerifyMode::Size)]
    pub verify: VerifyMode,

    /// Content type (guessed from the file extension when omitted)
    #[arg(long)]
    pub content_type: Option<String>,

    #[command(flatten)]
    pub parts: PartArgs,

    #[command(flatten)]
    pub aws: AwsArgs,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Skip verification
    None,
    /// Compare object size with the local file
    Size,
    /// Compare part and multipart ETags with local MD5 digests
    Md5,
}

impl From<VerifyMode> for Verify {
    fn from(mode: VerifyMode) -> Self {
        match mode {
            VerifyMode::None => Verify::None,
            VerifyMode::Size => Verify::Size,
            VerifyMode::Md5 => Verify::Md5,
        }
    }
}

#[derive(Debug, Serialize)]
struct PutOutput {
    file: String,
    target: String,
    size_bytes: u64,
    size_human: String,
    parts: usize,
    etag: String,
    content_type: Option<String>,
}

impl PutArgs {
    fn upload_options(&self, config: &Config) -> UploadOptions {
        let copy = self.parts.copy_options(config);
        let content_type = self.content_type.clone().or_else(|| {
            mime_guess::from_path(&self.file)
                .first()
                .map(|mime| mime.essence_str().to_string())
        });
        UploadOptions {
            part_size: copy.part_size,
            parallel: copy.parallel,
            retry: copy.retry,
            verify: self.verify.into(),
            content_type,
            abort_on_failure: copy.abort_on_failure,
        }
    }
}

/// Execute the put command
pub async fn execute(args: PutArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let dst = match parse_object(&args.target, &formatter) {
        Ok(dst) => dst,
        Err(code) => return code,
    };

    if !args.file.is_file() {
        formatter.error(&format!("{} is not a file", args.file.display()));
        return ExitCode::UsageError;
    }

    let options = args.upload_options(config);
    if options.part_size == 0 {
        formatter.error("Part size must be greater than zero");
        return ExitCode::UsageError;
    }

    let store = match args.aws.connect(config, &formatter).await {
        Ok(store) => store,
        Err(code) => return code,
    };

    match upload_file(store.as_ref(), &args.file, &dst, &options).await {
        Ok(summary) => {
            let output = PutOutput {
                file: args.file.display().to_string(),
                target: dst.to_string(),
                size_bytes: summary.size,
                size_human: humansize::format_size(summary.size, humansize::BINARY),
                parts: summary.parts,
                etag: summary.etag,
                content_type: options.content_type,
            };
            if formatter.is_json() {
                formatter.json(&output);
            } else {
                formatter.success(&format!(
                    "{} -> {} ({}, {} part(s))",
                    output.file,
                    formatter.style_name(&output.target),
                    formatter.style_size(output.size_bytes),
                    output.parts
                ));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to upload {}: {e}", args.file.display()));
            ExitCode::from(&e)
        }
    }
}
