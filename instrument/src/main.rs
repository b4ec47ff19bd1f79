use clap::Parser;
use github_pr::DEFAULT_AUTH_URL;
use instrumenter::cli::{Args, initialize};
use instrumenter::{Instrumenter, WorkflowRequest};
use serde::Serialize;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = Args::parse();

    // Setup logging. Logs go to stderr so stdout only carries the JSON result.
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match initialize(&args) {
        Ok(Some(config)) => config,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let repository = args.repository.as_deref().unwrap_or_default();

    let instrumenter = match Instrumenter::from_config(&config) {
        Ok(instrumenter) => instrumenter,
        Err(e) => {
            error!("Setup failed: {e}");
            print_json(&e.to_payload(repository, DEFAULT_AUTH_URL));
            return ExitCode::FAILURE;
        }
    };
    let request = WorkflowRequest {
        repository,
        additional_context: &args.context,
        session: None,
        branch: args.branch.as_deref(),
    };
    match instrumenter.run(&request) {
        Ok(result) => {
            print_json(&result);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Instrumentation failed: {e}");
            print_json(&instrumenter.error_payload(repository, &e));
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to serialize output: {e}"),
    }
}
