use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use inliner::config;

/// Config controls.
#[derive(Clone, Debug, Args)]
#[command(name = "config")]
pub struct Config {
    #[command(subcommand)]
    action: ConfigSubcommands,
}

impl Config {
    #[tracing::instrument(level = "trace", skip(self, config))]
    pub async fn run(self, config: Option<PathBuf>) -> Result<()> {
        match self.action {
            ConfigSubcommands::Show => {
                let cfg = config::load(config)?;
                let json = serde_json::to_string_pretty(&cfg)
                    .context("error serializing configuration")?;
                println!("{json}");
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Subcommand)]
enum ConfigSubcommands {
    /// Show the effective config, before applying CLI overrides.
    Show,
}
