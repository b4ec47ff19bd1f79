//! The command-line arguments and configuration system for [crate::Instrumenter] and the
//! `instrument` binary.

use clap::Parser;
use config::FileFormat::Toml;
use config::ValueKind;
use directories::ProjectDirs;
use instrumenter_core::config::Config;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Command-line arguments for the `instrument` binary.
#[derive(Debug, Parser)]
#[command(about = "Adds Datadog instrumentation to a repository's Lambda functions and opens a pull request")]
pub struct Args {
    /// Repository to instrument: owner/repo or a GitHub URL.
    #[arg(required_unless_present = "print_config_path")]
    pub repository: Option<String>,

    /// Extra instructions for the model, e.g. which functions to leave alone.
    #[arg(long, default_value = "")]
    pub context: String,

    /// Set a configuration value; format $NAME=$VALUE.
    #[arg(long, short)]
    pub config: Vec<String>,

    /// Name of the branch to push. Defaults to a generated, timestamped name.
    #[arg(long)]
    pub branch: Option<String>,

    /// Branch the pull request targets. Defaults to the repository's default branch.
    #[arg(long)]
    pub base: Option<String>,

    /// Leave the clone on disk after a successful run.
    #[arg(long)]
    pub keep_clone: bool,

    /// Prints out the location of the config file.
    #[arg(long)]
    pub print_config_path: bool,

    /// Log at debug level (ignored if RUST_LOG is set).
    #[arg(long, short)]
    pub verbose: bool,
}

/// Performs parsing and validation of the config; to be called by main() before executing any code
/// that tries to retrieve the config.
///
/// Returns the config, or None if a command line flag that calls for an early exit (such as
/// --print-config-path) was provided.
pub fn initialize(args: &Args) -> Result<Option<Config>, CliError> {
    let dirs = ProjectDirs::from("", "", "instrumenter");
    let config_dir = dirs.as_ref().map(ProjectDirs::config_dir);
    if args.print_config_path {
        match config_dir {
            Some(dir) => println!("Config file location: {:?}", config_file(dir)),
            None => println!("No home directory found; only ./config.toml is read"),
        }
        return Ok(None);
    }
    let config = load_config(args, config_dir)?;
    config.validate();
    Ok(Some(config))
}

fn load_config(args: &Args, config_dir: Option<&Path>) -> Result<Config, CliError> {
    let mut settings = config::Config::builder().add_source(config::File::from_str(
        include_str!("../default_config.toml"),
        Toml,
    ));
    if let Some(dir) = config_dir {
        settings = settings.add_source(config::File::from(config_file(dir)).required(false));
    }
    settings = settings.add_source(config::File::from(PathBuf::from("config.toml")).required(false));

    for config_arg in &args.config {
        let Some((name, value)) = config_arg.split_once('=') else {
            return Err(CliError::MalformedOverride(config_arg.clone()));
        };
        settings = settings.set_override(name.trim(), override_value(value))?;
    }
    if let Some(base) = &args.base {
        settings = settings.set_override("tools.github_pr.base_branch", base.as_str())?;
    }
    if args.keep_clone {
        settings = settings.set_override("keep_clone", true)?;
    }

    Ok(settings.build()?.try_deserialize()?)
}

/// Tool sections are kept as untyped JSON until each tool deserializes its own, so command-line
/// values are typed here: `--config tools.describe_pr.max_tokens=512` has to arrive as a number.
fn override_value(value: &str) -> ValueKind {
    if let Ok(flag) = value.parse::<bool>() {
        return ValueKind::Boolean(flag);
    }
    if let Ok(number) = value.parse::<i64>() {
        return ValueKind::I64(number);
    }
    ValueKind::String(value.into())
}

/// Returns the config file path, given the config directory.
fn config_file(config_dir: &Path) -> PathBuf {
    [config_dir, "instrument.toml".as_ref()].iter().collect()
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to parse config value {0:?}; no '=' found")]
    MalformedOverride(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
}
