//! Asset pipelines & transform plugins.
//!
//! A plugin turns the byte stream of one asset into another byte stream. Plugins are chained per
//! asset kind, the output of one plugin being the input of the next one.

mod asset;
mod command;
mod html;
mod minify;

use std::path::Path;
use std::sync::Arc;

pub use asset::{AssetKind, AssetReference};
pub use command::CommandPlugin;
pub use html::HtmlPipeline;
pub use minify::{MinifyCss, MinifyJs};

use crate::common::ByteStream;
use crate::config::{BuildConfig, BuiltinPlugin, CommandSpec, PluginSpec, Plugins};
use crate::supervisor::Stage;

pub const ATTR_HREF: &str = "href";
pub const ATTR_SRC: &str = "src";
pub const ATTR_DATA_HREF: &str = "data-href";
pub const ATTR_DATA_SRC: &str = "data-src";

/// A transform step of an asset.
///
/// A plugin receives the input by value and must consume it at most once. It returns right away;
/// the returned stream produces data asynchronously, and reports failures as `Err` items.
pub trait Plugin: Send + Sync {
    /// The name of the plugin, used in diagnostics.
    fn name(&self) -> &str;

    /// Transform the asset at `path`.
    fn apply(&self, path: &Path, input: ByteStream, cfg: &BuildConfig) -> ByteStream;
}

/// An ordered list of plugins for one asset kind.
#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    /// Resolve plugin identifiers to plugins.
    pub fn resolve(specs: &[PluginSpec], cfg: &BuildConfig) -> Self {
        let plugins = specs
            .iter()
            .map(|spec| -> Arc<dyn Plugin> {
                match spec {
                    PluginSpec::Builtin(BuiltinPlugin::Bundle) => Arc::new(CommandPlugin::new(
                        BuiltinPlugin::Bundle.as_ref(),
                        CommandSpec::from(cfg.bundle.clone()),
                    )),
                    PluginSpec::Builtin(BuiltinPlugin::MinifyJs) => Arc::new(MinifyJs),
                    PluginSpec::Builtin(BuiltinPlugin::MinifyCss) => Arc::new(MinifyCss),
                    PluginSpec::Command(command) => {
                        Arc::new(CommandPlugin::new(&command.command, command.clone()))
                    }
                }
            })
            .collect();
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    /// The stages of this chain for the asset at `path`, in order.
    pub fn stages(&self, path: &Path, cfg: &Arc<BuildConfig>) -> Vec<Stage> {
        self.plugins
            .iter()
            .map(|plugin| -> Stage {
                let plugin = plugin.clone();
                let path = path.to_path_buf();
                let cfg = cfg.clone();
                Box::new(move |input| {
                    tracing::debug!(plugin = plugin.name(), path = %path.display(), "applying plugin");
                    plugin.apply(&path, input, &cfg)
                })
            })
            .collect()
    }
}

/// The plugin chains of a build.
#[derive(Clone, Default)]
pub struct PluginChains {
    pub js: PluginChain,
    pub css: PluginChain,
}

impl PluginChains {
    pub fn new(js: PluginChain, css: PluginChain) -> Self {
        Self { js, css }
    }

    /// Resolve the configured plugin identifiers.
    pub fn resolve(plugins: &Plugins, cfg: &BuildConfig) -> Self {
        Self {
            js: PluginChain::resolve(&plugins.js, cfg),
            css: PluginChain::resolve(&plugins.css, cfg),
        }
    }

    pub fn for_kind(&self, kind: AssetKind) -> &PluginChain {
        match kind {
            AssetKind::Css => &self.css,
            AssetKind::Js => &self.js,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::Supervisor;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use futures_util::stream;

    struct Tag(&'static str);

    impl Plugin for Tag {
        fn name(&self) -> &str {
            self.0
        }

        fn apply(&self, _path: &Path, input: ByteStream, _cfg: &BuildConfig) -> ByteStream {
            let tag = self.0;
            input
                .chain(stream::iter([Ok(Bytes::from(format!("[{tag}]")))]))
                .boxed()
        }
    }

    #[test]
    fn resolution_table() {
        let cfg = BuildConfig::default();
        let chains = PluginChains::resolve(&Plugins::default(), &cfg);
        assert_eq!(chains.js.names(), vec!["bundle", "minifyJS"]);
        assert_eq!(chains.css.names(), vec!["minifyCSS"]);

        let plugins = Plugins {
            js: vec![PluginSpec::Command(CommandSpec {
                command: "cat".into(),
                args: vec![],
            })],
            css: vec![],
        };
        let chains = PluginChains::resolve(&plugins, &cfg);
        assert_eq!(chains.js.names(), vec!["cat"]);
        assert!(chains.css.is_empty());
    }

    #[tokio::test]
    async fn chain_order_is_kept() -> crate::Result<()> {
        let cfg = Arc::new(BuildConfig::default());
        let chain = PluginChain::new(vec![Arc::new(Tag("one")), Arc::new(Tag("two"))]);
        let supervisor = Supervisor::new();

        let input = stream::iter([Ok(Bytes::from_static(b"asset"))]).boxed();
        let mut out = supervisor.pipe(input, chain.stages(Path::new("/a.js"), &cfg));
        let mut buf = Vec::new();
        while let Some(chunk) = out.next().await {
            buf.extend_from_slice(&chunk?);
        }
        assert_eq!(buf, b"asset[one][two]");
        supervisor.finish()
    }
}
