//! exec command - Run another program with the resolved credentials
//!
//! The key pair is set in the child's environment only, so tooling that reads
//! `AWS_*` variables uses the same key. The kaws process itself is untouched.

use clap::Args;
use kaws_core::Config;
use tokio::process::Command;

use super::aws_args::AwsArgs;
use super::creds::REGION_VAR;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Run a command with the resolved credentials in its environment
#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub aws: AwsArgs,

    /// Program and arguments, after `--`
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Execute the exec command
pub async fn execute(args: ExecArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let resolved = match args.aws.resolve(config, &formatter).await {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };

    let Some((program, rest)) = args.command.split_first() else {
        formatter.error("No command given");
        return ExitCode::UsageError;
    };

    let mut command = Command::new(program);
    command.args(rest).env(REGION_VAR, &resolved.region);
    // The ambient credential sets nothing; the child inherits whatever is there
    for (name, value) in resolved.credential.environment_vars() {
        match value {
            Some(value) => command.env(name, value),
            None => command.env_remove(name),
        };
    }

    tracing::debug!(program = %program, args = rest.len(), "Running command");
    let status = command.status().await;

    match status {
        Ok(status) if status.success() => ExitCode::Success,
        Ok(status) => {
            formatter.error(&format!("{program} exited with {status}"));
            ExitCode::GeneralError
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            formatter.error(&format!("Command not found: {program}"));
            ExitCode::NotFound
        }
        Err(e) => {
            formatter.error(&format!("Failed to run {program}: {e}"));
            ExitCode::GeneralError
        }
    }
}
