//! Build system facade.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncRead;

use crate::config::BuildConfig;
use crate::worker::{self, BuildOutput, WorkerCommand};
use crate::{ErrorReason, ResultExt};

/// The entry document of a build.
pub enum Entry {
    /// A file, its folder becomes the base directory of the build.
    Path(PathBuf),
    /// An already open reader, the configured base directory is used.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl Entry {
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Reader(_) => f.write_str("Reader"),
        }
    }
}

impl From<PathBuf> for Entry {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for Entry {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

/// Builds self-contained documents.
///
/// This is the entry point for library users. Every call to [`Builder::build`] works on its own
/// copy of the configuration and runs in its own worker process.
#[derive(Clone, Debug)]
pub struct Builder {
    config: BuildConfig,
    worker: WorkerCommand,
}

impl Builder {
    /// Create a builder running the worker of the current executable.
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            worker: WorkerCommand::current_exe(),
        }
    }

    /// Use a different command to start workers.
    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = worker;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build a document.
    ///
    /// Returns right away, the build happens while the output is consumed. Failures, including
    /// a missing entry file, are reported as the last item of the output. Must be called from
    /// within a Tokio runtime.
    #[tracing::instrument(level = "trace", skip(self, entry))]
    pub fn build(&self, entry: impl Into<Entry>) -> BuildOutput {
        let mut config = self.config.clone();
        let entry = match entry.into() {
            Entry::Path(path) => {
                let path = match std::path::absolute(&path)
                    .with_reason(|| ErrorReason::EntryNotExist { path: path.clone() })
                    .and_then(|path| match path.parent() {
                        Some(parent) => {
                            config.base_dir = parent.to_path_buf();
                            Ok(path)
                        }
                        None => Err(ErrorReason::PathNoParent { path }.into_error()),
                    }) {
                    Ok(path) => path,
                    Err(err) => return BuildOutput::failed(err),
                };
                Entry::Path(path)
            }
            reader => reader,
        };

        tracing::debug!(
            ?entry,
            base_dir = %config.base_dir.display(),
            "starting build"
        );
        worker::start(&self.worker, &config, entry)
    }
}
