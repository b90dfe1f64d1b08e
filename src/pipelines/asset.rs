use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::PluginChains;
use crate::common::ByteStream;
use crate::common::url::{is_local, resolve_asset_path};
use crate::config::BuildConfig;
use crate::processing::replace::{escape_closing_script, rewrite_css_urls};
use crate::supervisor::{Stage, Supervisor};
use crate::{ErrorExt, ErrorReason, ResultExt};

/// The kind of an inlined asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AssetKind {
    Css,
    Js,
}

/// A local asset referenced by an element of the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetReference {
    pub kind: AssetKind,
    /// The original attribute value.
    pub href: String,
    /// The file on disk.
    pub path: PathBuf,
    /// The folder of the file, relative references inside the asset are based on it.
    pub folder: PathBuf,
}

impl AssetReference {
    /// Create a reference, returns `None` for references which are not local.
    pub fn new(kind: AssetKind, href: &str, base_dir: &Path) -> Option<Self> {
        if !is_local(href) {
            tracing::debug!(%kind, href, "skipping non-local reference");
            return None;
        }

        let path = resolve_asset_path(base_dir, href);
        let folder = path.parent().unwrap_or(base_dir).to_path_buf();
        Some(Self {
            kind,
            href: href.to_string(),
            path,
            folder,
        })
    }

    /// Open the file as a stream.
    ///
    /// Opening happens once the stream is polled, so a missing file fails the stream rather than
    /// this call.
    pub fn open(&self) -> ByteStream {
        let path = self.path.clone();
        stream::once(async move {
            let file = File::open(&path).await.map_err(|err| match err.kind() {
                ErrorKind::NotFound => err.reason(ErrorReason::FsNotExist { path: path.clone() }),
                _ => err.reason(ErrorReason::FsReadFailed { path: path.clone() }),
            })?;
            tracing::trace!(path = %path.display(), "opened asset");

            Ok::<_, crate::Error>(
                ReaderStream::new(file)
                    .map(move |chunk| {
                        chunk.with_reason(|| ErrorReason::FsReadFailed { path: path.clone() })
                    })
                    .boxed(),
            )
        })
        .try_flatten()
        .boxed()
    }

    /// The complete content of this asset, ready to be placed into the document.
    ///
    /// The file is piped through the plugin chain of its kind, unless in debug mode, and then
    /// through the fixups which keep the inlined text valid. These always run: stylesheets get
    /// their references re-based onto the document folder and scripts get closing script tags
    /// escaped.
    pub fn pipe(
        &self,
        cfg: &Arc<BuildConfig>,
        chains: &PluginChains,
        supervisor: &Supervisor,
    ) -> ByteStream {
        let mut stages = match cfg.debug {
            true => Vec::new(),
            false => chains.for_kind(self.kind).stages(&self.path, cfg),
        };
        stages.push(self.fixup(cfg));

        tracing::debug!(
            kind = %self.kind,
            path = %crate::common::strip_prefix(&self.path).display(),
            stages = stages.len(),
            "inlining asset"
        );
        supervisor.pipe(self.open(), stages)
    }

    fn fixup(&self, cfg: &BuildConfig) -> Stage {
        match self.kind {
            AssetKind::Css => {
                let folder = self.folder.clone();
                let base_dir = cfg.base_dir.clone();
                Box::new(move |input| rewrite_css_urls(input, folder, base_dir))
            }
            AssetKind::Js => Box::new(escape_closing_script),
        }
    }
}
