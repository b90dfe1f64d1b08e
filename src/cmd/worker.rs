use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use futures_util::StreamExt;
use inliner::config::{BuildConfig, Plugins};
use inliner::pipelines::{HtmlPipeline, PluginChains};
use inliner::{ErrorReason, ResultExt};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Run a single build, reading the document from stdin and writing the result to stdout.
///
/// Started by the builder, which passes the configuration and the plugin lists as arguments.
#[derive(Clone, Debug, Args)]
#[command(name = "worker")]
pub struct Worker {
    /// The build configuration, as JSON
    pub config: String,
    /// The plugin lists, as JSON
    pub plugins: String,
}

impl Worker {
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn run(self) -> Result<()> {
        let mut cfg: BuildConfig =
            serde_json::from_str(&self.config).context("invalid worker configuration")?;
        let plugins: Plugins =
            serde_json::from_str(&self.plugins).context("invalid worker plugin lists")?;

        let chains = PluginChains::resolve(&plugins, &cfg);
        tracing::debug!(
            js = ?chains.js.names(),
            css = ?chains.css.names(),
            "resolved plugins"
        );
        cfg.plugins = plugins;

        let pipeline = HtmlPipeline::new(Arc::new(cfg), Arc::new(chains));
        let input = ReaderStream::new(tokio::io::stdin())
            .map(|chunk| chunk.reason(ErrorReason::EntryReadFailed))
            .boxed();
        let mut output = pipeline.run(input)?;

        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = output.next().await {
            stdout
                .write_all(&chunk?)
                .await
                .reason(ErrorReason::OutputWriteFailed)?;
        }
        stdout.flush().await.reason(ErrorReason::OutputWriteFailed)?;

        pipeline.supervisor().finish()?;
        Ok(())
    }
}
