//! Source HTML pipeline.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use url::Url;

use super::{
    ATTR_DATA_HREF, ATTR_DATA_SRC, ATTR_HREF, ATTR_SRC, AssetKind, AssetReference, PluginChains,
};
use crate::common::ByteStream;
use crate::common::escape_attribute;
use crate::common::html_rewrite::{ContentTarget, ElementRef, HtmlRewrite};
use crate::config::BuildConfig;
use crate::supervisor::Supervisor;
use crate::{ErrorReason, Result, ResultExt};

const SELECTOR_STYLESHEET: &str = r#"link[rel="stylesheet"]"#;
const SELECTOR_SCRIPT: &str = "script[src]";
const SELECTOR_BASE: &str = "head base";

/// Attributes of a stylesheet link which make no sense on an inline `<style>`.
const EXCLUDE_STYLE: &[&str] = &["rel", "href", "type", "integrity", "crossorigin"];

/// An HTML document build pipeline.
///
/// This pipeline is responsible for processing the source HTML, inlining every local stylesheet
/// and script it references. All asset pipelines of a document share one [`Supervisor`], the
/// first failure of any of them fails the document.
pub struct HtmlPipeline {
    /// Build config.
    cfg: Arc<BuildConfig>,
    /// Plugin chains for the assets.
    chains: Arc<PluginChains>,
    supervisor: Supervisor,
}

impl HtmlPipeline {
    pub fn new(cfg: Arc<BuildConfig>, chains: Arc<PluginChains>) -> Self {
        Self {
            cfg,
            chains,
            supervisor: Supervisor::new(),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Run the pipeline over a document.
    ///
    /// The output ends with the first failure of the build, if any. Must be called from within a
    /// Tokio runtime.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn run(&self, input: ByteStream) -> Result<ByteStream> {
        let mut rewrite = HtmlRewrite::new()
            .select_all(SELECTOR_STYLESHEET, self.stylesheet_handler())?
            .select_all(SELECTOR_SCRIPT, self.script_handler())?;

        if let Some(base_url) = &self.cfg.base_url {
            let base_url = base_url.clone();
            rewrite = rewrite.select_all(SELECTOR_BASE, move |el| rebase(el, &base_url))?;
        }

        let output = rewrite.run(self.supervisor.guard(input));
        Ok(self.supervisor.outcome(output))
    }

    fn stylesheet_handler(
        &self,
    ) -> impl FnMut(&mut ElementRef<'_, '_, '_>) -> Result<()> + Send + 'static {
        let cfg = self.cfg.clone();
        let chains = self.chains.clone();
        let supervisor = self.supervisor.clone();

        move |el: &mut ElementRef<'_, '_, '_>| {
            let Some(href) = el.get_attribute(ATTR_HREF) else {
                return Ok(());
            };
            let Some(asset) = AssetReference::new(AssetKind::Css, &href, &cfg.base_dir) else {
                return Ok(());
            };

            let attrs = el
                .attributes()
                .into_iter()
                .filter(|(name, _)| !EXCLUDE_STYLE.contains(&name.as_str()))
                .map(|(name, value)| format!(r#" {name}="{}""#, escape_attribute(&value)))
                .collect::<String>();
            let open = format!(
                r#"<style {ATTR_DATA_HREF}="{}"{attrs}>"#,
                escape_attribute(&href)
            );

            let content = stream::iter([Ok(Bytes::from(open))])
                .chain(asset.pipe(&cfg, &chains, &supervisor))
                .chain(stream::iter([Ok(Bytes::from_static(b"</style>"))]))
                .boxed();
            el.replace_with_stream(ContentTarget::Outer, content);
            Ok(())
        }
    }

    fn script_handler(
        &self,
    ) -> impl FnMut(&mut ElementRef<'_, '_, '_>) -> Result<()> + Send + 'static {
        let cfg = self.cfg.clone();
        let chains = self.chains.clone();
        let supervisor = self.supervisor.clone();

        move |el: &mut ElementRef<'_, '_, '_>| {
            let Some(src) = el.get_attribute(ATTR_SRC) else {
                return Ok(());
            };
            let Some(asset) = AssetReference::new(AssetKind::Js, &src, &cfg.base_dir) else {
                return Ok(());
            };

            el.set_attribute(ATTR_DATA_SRC, &src)?;
            el.remove_attribute(ATTR_SRC);
            el.replace_with_stream(
                ContentTarget::Inner,
                asset.pipe(&cfg, &chains, &supervisor),
            );
            Ok(())
        }
    }
}

/// Resolve the `href` of a `<base>` element against the configured base URL.
fn rebase(el: &mut ElementRef<'_, '_, '_>, base_url: &Url) -> Result<()> {
    let href = el.get_attribute(ATTR_HREF).unwrap_or_default();
    let resolved = base_url
        .join(&href)
        .with_reason(|| ErrorReason::BaseUrlJoinFailed {
            base_url: base_url.to_string(),
            href: href.clone(),
        })?;
    el.set_attribute(ATTR_HREF, resolved.as_str())
}
