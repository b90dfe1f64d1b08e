use std::borrow::Cow;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Reasons why Error happened.
#[derive(Debug, Error)]
pub enum ErrorReason {
    /// a referenced local asset does not exist
    #[error("file {} does not exist", path.display())]
    FsNotExist { path: PathBuf },
    /// failed to read file
    #[error("failed to read {}", path.display())]
    FsReadFailed { path: PathBuf },
    /// failed to write file
    #[error("failed to write {}", path.display())]
    FsWriteFailed { path: PathBuf },
    /// path does not have a parent directory
    #[error("path {} does not have a parent directory", path.display())]
    PathNoParent { path: PathBuf },

    /// a transform plugin failed on an asset
    #[error("plugin `{plugin}` failed on {}: {message}", path.display())]
    PluginFailed {
        plugin: Cow<'static, str>,
        path: PathBuf,
        message: String,
    },
    /// failed to spawn the process behind a command plugin
    #[error("failed to run command `{command}` for plugin `{plugin}`")]
    PluginCommandFailed {
        plugin: Cow<'static, str>,
        command: String,
    },
    /// an asset is not valid UTF-8 and cannot be handed to a minifier
    #[error("asset {} is not valid UTF-8", path.display())]
    AssetNotUtf8 { path: PathBuf },

    /// a selector handed to the html rewriter did not parse
    #[error("invalid selector `{selector}`")]
    HtmlSelectorInvalid { selector: String },
    /// an attribute could not be written
    #[error("invalid attribute `{name}`")]
    HtmlAttributeInvalid { name: String },
    /// the html rewriter failed
    #[error("error rewriting html document")]
    HtmlRewriteFailed,
    /// the `<base>` href could not be resolved against the configured base URL
    #[error("unable to resolve <base href=\"{href}\"> against {base_url}")]
    BaseUrlJoinFailed { base_url: String, href: String },

    /// the caller-supplied entry document failed while being read
    #[error("error reading entry document")]
    EntryReadFailed,
    /// the entry document path could not be opened
    #[error("entry document {} does not exist", path.display())]
    EntryNotExist { path: PathBuf },

    /// the worker configuration could not be serialized or deserialized
    #[error("invalid worker arguments")]
    WorkerArgsInvalid,
    /// the worker process could not be spawned
    #[error("failed to spawn worker process `{program}`")]
    WorkerSpawnFailed { program: String },
    /// waiting on the worker process failed
    #[error("failed waiting on worker process")]
    WorkerWaitFailed,
    /// the worker exited with a bad status, carrying its last diagnostic line
    #[error("{diagnostic}")]
    WorkerFailed {
        status: ExitStatus,
        diagnostic: String,
    },
    /// the worker went away without reporting its outcome
    #[error("worker supervision ended without an outcome")]
    WorkerLost,
    /// reading the worker output failed
    #[error("error reading worker output")]
    WorkerOutputFailed,

    /// writing the finished document failed
    #[error("error writing output document")]
    OutputWriteFailed,

    /// Tokio task failed to join
    #[error("tokio task has failed to join")]
    TokioTaskFailed,
}

impl ErrorReason {
    /// Turns a reason into an error with no source error.
    pub fn into_error(self) -> Error {
        Error {
            source: None,
            reason: Box::new(self),
        }
    }

    /// Turns a reason into an error, keeping an already boxed source error.
    pub fn into_error_with(self, source: Box<dyn std::error::Error + Send + Sync>) -> Error {
        Error {
            source: Some(source),
            reason: Box::new(self),
        }
    }
}

/// Error emitted by a build.
#[derive(Error, Debug)]
#[error("{reason}", reason = .reason)]
pub struct Error {
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub reason: Box<ErrorReason>,
}

impl From<ErrorReason> for Error {
    fn from(reason: ErrorReason) -> Self {
        reason.into_error()
    }
}

/// Error extensions to make it easier to work with existing errors.
pub trait ErrorExt {
    /// Add a reason to an existing error, making it a type of [`Error`].
    fn reason(self, reason: ErrorReason) -> Error;

    /// Similar to reason(), but the reason is created with a closure dynamically.
    fn with_reason<R>(self, with_reason: R) -> Error
    where
        R: FnOnce() -> ErrorReason;
}

/// Result extensions to make it easier to work with existing results.
pub trait ResultExt<T> {
    /// Add a reason to an existing error, making it a type of [`Error`].
    fn reason(self, reason: ErrorReason) -> Result<T>;

    /// Similar to reason(), but the reason is created with a closure dynamically.
    fn with_reason<R>(self, with_reason: R) -> Result<T>
    where
        R: FnOnce() -> ErrorReason;
}

impl<E> ErrorExt for E
where
    E: 'static + std::error::Error + Send + Sync,
{
    fn reason(self, reason: ErrorReason) -> Error {
        Error {
            source: Some(Box::new(self)),
            reason: Box::new(reason),
        }
    }

    fn with_reason<R>(self, with_reason: R) -> Error
    where
        R: FnOnce() -> ErrorReason,
    {
        self.reason(with_reason())
    }
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: 'static + std::error::Error + Send + Sync,
{
    fn reason(self, reason: ErrorReason) -> Result<T> {
        self.map_err(|e| e.reason(reason))
    }

    fn with_reason<R>(self, with_reason: R) -> Result<T>
    where
        R: FnOnce() -> ErrorReason,
    {
        self.map_err(move |e| e.reason(with_reason()))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn reason(self, reason: ErrorReason) -> Result<T> {
        self.ok_or_else(|| reason.into_error())
    }

    fn with_reason<R>(self, with_reason: R) -> Result<T>
    where
        R: FnOnce() -> ErrorReason,
    {
        self.ok_or_else(move || with_reason().into_error())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
