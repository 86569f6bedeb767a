//! Command implementations
//!
//! Every command takes its parsed arguments, the loaded [`kaws_core::Config`],
//! and the output settings, and returns an [`ExitCode`](crate::exit_code::ExitCode).

pub mod aws_args;
pub mod bucket;
pub mod completions;
pub mod copy_bucket;
pub mod copy_key;
pub mod creds;
pub mod exec;
pub mod exists;
pub mod get;
pub mod purge;
pub mod put;
pub mod sync;
