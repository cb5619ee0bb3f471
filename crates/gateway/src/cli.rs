//! Command-line interface for the `voxagent` binary.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use vox_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "voxagent", about = "Conversational voice-agent backend")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP/WebSocket server (the default).
    Serve,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report problems.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load the config file; a missing file yields the defaults.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Config::from_toml(&raw)?)
}

/// `config validate`: returns whether the config is clean.
pub fn validate(config: &Config, path: &Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        true
    } else {
        for issue in &issues {
            eprintln!("{}: {issue}", path.display());
        }
        false
    }
}

/// `config show`: print the effective configuration.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
