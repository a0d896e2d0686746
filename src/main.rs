//! CLI entry point for the inlyse scanner.

use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

mod app;
mod cli;

use cli::Args;

/// Outcome of an invocation, mapped to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Success,
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::FAILURE,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    app::init_tracing(app::default_log_level(args.verbose));
    debug!(command = ?args.command, "CLI arguments parsed");

    match app::run(args).await {
        Ok(exit) => exit.into(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
