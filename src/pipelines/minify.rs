//! Minification plugins.
//!
//! Minifiers need a complete parse, so these buffer the whole asset and run on the blocking pool.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::future::ready;
use futures_util::stream::{self, StreamExt, TryStreamExt};

use super::Plugin;
use crate::common::ByteStream;
use crate::config::{BuildConfig, BuiltinPlugin};
use crate::processing::minify::{TopLevelMode, minify_css, minify_js};
use crate::{ErrorReason, Result, ResultExt};

/// Minify scripts.
///
/// `.mjs` files are minified as modules, everything else as classic scripts.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinifyJs;

impl Plugin for MinifyJs {
    fn name(&self) -> &str {
        let name: &'static str = BuiltinPlugin::MinifyJs.into();
        name
    }

    fn apply(&self, path: &Path, input: ByteStream, cfg: &BuildConfig) -> ByteStream {
        let mode = match path.extension().and_then(|ext| ext.to_str()) {
            Some("mjs") => TopLevelMode::Module,
            _ => TopLevelMode::Global,
        };
        let mangle = cfg.minify.mangle;

        minify_with(
            BuiltinPlugin::MinifyJs,
            path.to_path_buf(),
            input,
            move |source| minify_js(source, mode, mangle),
        )
    }
}

/// Minify stylesheets.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinifyCss;

impl Plugin for MinifyCss {
    fn name(&self) -> &str {
        let name: &'static str = BuiltinPlugin::MinifyCss.into();
        name
    }

    fn apply(&self, path: &Path, input: ByteStream, _cfg: &BuildConfig) -> ByteStream {
        minify_with(BuiltinPlugin::MinifyCss, path.to_path_buf(), input, minify_css)
    }
}

fn minify_with<F>(plugin: BuiltinPlugin, path: PathBuf, input: ByteStream, minify: F) -> ByteStream
where
    F: FnOnce(&str) -> anyhow::Result<String> + Send + 'static,
{
    stream::once(async move {
        let source = input
            .try_fold(Vec::new(), |mut buf, chunk| {
                buf.extend_from_slice(&chunk);
                ready(Ok(buf))
            })
            .await?;
        let source = String::from_utf8(source)
            .with_reason(|| ErrorReason::AssetNotUtf8 { path: path.clone() })?;

        tracing::debug!(%plugin, path = %path.display(), "minifying");
        let minified = tokio::task::spawn_blocking(move || minify(&source))
            .await
            .reason(ErrorReason::TokioTaskFailed)?
            .map_err(|err| {
                ErrorReason::PluginFailed {
                    plugin: <&'static str>::from(plugin).into(),
                    path,
                    message: format!("{err:#}"),
                }
                .into_error()
            })?;

        Ok::<_, crate::Error>(Bytes::from(minified))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(chunks: &[&'static str]) -> ByteStream {
        stream::iter(
            chunks
                .iter()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(mut stream: ByteStream) -> Result<String> {
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    #[tokio::test]
    async fn css_across_chunks() -> Result<()> {
        let cfg = BuildConfig::default();
        let out = MinifyCss.apply(
            Path::new("/site/css/main.css"),
            input(&["body {\n  marg", "in: 0px;\n}\n"]),
            &cfg,
        );
        assert_eq!(collect(out).await?, "body{margin:0}");
        Ok(())
    }

    #[tokio::test]
    async fn js_failure_names_plugin_and_path() {
        let cfg = BuildConfig::default();
        let out = MinifyJs.apply(Path::new("/site/js/broken.js"), input(&["var = ;"]), &cfg);
        let err = collect(out).await.expect_err("invalid script must fail");
        assert!(
            err.to_string()
                .starts_with("plugin `minifyJS` failed on /site/js/broken.js"),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn js_is_minified() -> Result<()> {
        let cfg = BuildConfig::default();
        let source = "function add(first, second) {\n  return first + second;\n}\nwindow.add = add;\n";
        let out = collect(MinifyJs.apply(Path::new("/a.js"), input(&[source]), &cfg)).await?;
        assert!(out.len() < source.len(), "got: {out}");
        Ok(())
    }

    #[tokio::test]
    async fn not_utf8() {
        let cfg = BuildConfig::default();
        let bad = stream::iter([Ok(Bytes::from_static(&[0xff, 0xfe]))]).boxed();
        let err = collect(MinifyCss.apply(Path::new("/a.css"), bad, &cfg))
            .await
            .expect_err("binary input must fail");
        assert!(matches!(*err.reason, ErrorReason::AssetNotUtf8 { .. }));
    }
}
