#![deny(clippy::unwrap_used)]

mod cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use inliner::common::STARTING;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Inliner::parse();

    if let Err(err) = init_logging(&cli) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        "{}Starting {} {}",
        STARTING,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // a worker's host takes the last line of stderr as the failure message
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Inliner) -> Result<()> {
    tracing_subscriber::registry()
        .with(eval_logging(cli))
        // stdout carries the document
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .try_init()
        .context("error initializing logging")
}

fn eval_logging(cli: &Inliner) -> tracing_subscriber::EnvFilter {
    let directives = match (cli.verbose, cli.quiet) {
        // quiet overrides verbose
        (_, true) => "error,inliner=warn",
        // increase verbosity
        (0, false) => "error,inliner=info",
        (1, false) => "error,inliner=debug",
        (_, false) => "error,inliner=trace",
    };
    tracing_subscriber::EnvFilter::new(directives)
}

/// Inline local stylesheets & scripts into a single self-contained HTML document.
#[derive(Parser)]
#[command(about, author, version)]
#[command(args_conflicts_with_subcommands = true)]
struct Inliner {
    #[command(subcommand)]
    action: Option<InlinerSubcommands>,
    #[command(flatten)]
    build: cmd::build::Build,
    /// Path to the config file [default: Inliner.toml]
    #[arg(long, env = "INLINER_CONFIG", global(true))]
    pub config: Option<PathBuf>,
    /// Enable verbose logging.
    #[arg(short, long, global(true), action=ArgAction::Count)]
    pub verbose: u8,
    /// Be more quiet, conflicts with --verbose
    #[arg(short, long, global(true), conflicts_with("verbose"))]
    pub quiet: bool,
}

impl Inliner {
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn run(self) -> Result<()> {
        match self.action {
            Some(InlinerSubcommands::Build(inner)) => inner.run(self.config).await,
            Some(InlinerSubcommands::Config(inner)) => inner.run(self.config).await,
            Some(InlinerSubcommands::Worker(inner)) => inner.run().await,
            None => self.build.run(self.config).await,
        }
    }
}

#[derive(Subcommand)]
enum InlinerSubcommands {
    /// Inline the assets of a document, this is the default.
    Build(cmd::build::Build),
    /// Config controls.
    Config(cmd::config::Config),
    /// Run a single build on stdin & stdout.
    #[command(hide = true)]
    Worker(cmd::worker::Worker),
}

#[cfg(test)]
mod tests {
    use crate::Inliner;
    use clap::Parser;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Inliner::command().debug_assert();
    }

    #[test]
    fn build_is_the_default() {
        let cli = Inliner::try_parse_from(["inliner", "--entry", "index.html", "--debug"])
            .expect("valid arguments");
        assert!(cli.action.is_none());
        assert_eq!(cli.build.entry.as_deref(), Some(std::path::Path::new("index.html")));
        assert!(cli.build.debug);
    }

    #[test]
    fn worker_takes_two_documents() {
        let cli = Inliner::try_parse_from(["inliner", "worker", "--quiet", "{}", "{}"])
            .expect("valid arguments");
        assert!(cli.quiet);
        assert!(matches!(
            cli.action,
            Some(crate::InlinerSubcommands::Worker(_))
        ));
    }
}
