//! creds command - Show which credentials would be used
//!
//! Runs the resolver and prints where the key came from, or emits shell
//! `export` lines so other tooling can pick the same key up.

use clap::Args;
use kaws_core::{Config, RegionCredential};
use serde::Serialize;

use super::aws_args::AwsArgs;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Region variable exported next to the key pair
pub const REGION_VAR: &str = "AWS_DEFAULT_REGION";

/// Show the resolved credentials
#[derive(Args, Debug)]
pub struct CredsArgs {
    #[command(flatten)]
    pub aws: AwsArgs,

    /// Print shell export statements instead of a summary
    #[arg(long)]
    pub export: bool,
}

#[derive(Debug, Serialize)]
struct CredsOutput {
    ambient: bool,
    env: Option<String>,
    mode: Option<String>,
    region: String,
    access_key: String,
    session_token: bool,
}

impl From<&RegionCredential> for CredsOutput {
    fn from(resolved: &RegionCredential) -> Self {
        let credential = &resolved.credential;
        Self {
            ambient: credential.is_ambient(),
            env: credential.env.clone(),
            mode: credential.mode.map(|m| m.to_string()),
            region: resolved.region.clone(),
            access_key: credential.masked_access(),
            session_token: credential.token.is_some(),
        }
    }
}

/// Execute the creds command
pub async fn execute(args: CredsArgs, config: &Config, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let resolved = match args.aws.resolve(config, &formatter).await {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };

    if args.export {
        if resolved.credential.is_ambient() {
            formatter.warning("Using the instance identity, nothing to export");
            return ExitCode::Success;
        }
        // Export lines are the point of the command, so quiet mode does not apply
        for line in export_lines(&resolved) {
            println!("{line}");
        }
        return ExitCode::Success;
    }

    let output = CredsOutput::from(&resolved);
    if formatter.is_json() {
        formatter.json(&output);
    } else if output.ambient {
        formatter.field("Source", "instance identity");
        formatter.field("Region", &output.region);
    } else {
        formatter.field("Environment", output.env.as_deref().unwrap_or("-"));
        formatter.field("Mode", output.mode.as_deref().unwrap_or("-"));
        formatter.field("Region", &output.region);
        formatter.field("Access key", &formatter.style_name(&output.access_key));
        formatter.field(
            "Token",
            if output.session_token { "yes" } else { "no" },
        );
    }
    ExitCode::Success
}

/// `export`/`unset` statements for a POSIX shell
fn export_lines(resolved: &RegionCredential) -> Vec<String> {
    let mut lines: Vec<String> = resolved
        .credential
        .environment_vars()
        .into_iter()
        .map(|(name, value)| match value {
            Some(value) => format!("export {name}={}", shell_quote(&value)),
            None => format!("unset {name}"),
        })
        .collect();
    lines.push(format!("export {REGION_VAR}={}", shell_quote(&resolved.region)));
    lines
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaws_core::{AccessMode, Credential};

    #[test]
    fn test_export_lines() {
        let resolved = RegionCredential::new(
            Some("eu-west-1"),
            Credential::new("AKIA1", "se'cret").with_mode(AccessMode::Readonly),
        );
        assert_eq!(
            export_lines(&resolved),
            vec![
                "export AWS_ACCESS_KEY_ID='AKIA1'",
                r"export AWS_SECRET_ACCESS_KEY='se'\''cret'",
                "unset AWS_SESSION_TOKEN",
                "export AWS_DEFAULT_REGION='eu-west-1'",
            ]
        );
    }

    #[test]
    fn test_output_masks_access_key() {
        let resolved = RegionCredential::new(
            None,
            Credential::new("AKIAEXAMPLE", "secret")
                .with_token("token")
                .with_env("staging"),
        );
        let output = CredsOutput::from(&resolved);
        assert_eq!(output.access_key, "AKIA*******");
        assert!(output.session_token);
        assert!(!output.ambient);
        assert_eq!(output.region, "us-east-1");
        assert_eq!(output.env.as_deref(), Some("staging"));
    }
}
