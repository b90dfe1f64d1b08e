//! Supervision of piped byte streams.
//!
//! Every stream of a build is connected through the same [`Supervisor`]. The first failure of any
//! stream is recorded and cancels all others; later failures are only logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use futures_util::future;
use tokio_util::sync::CancellationToken;

use crate::common::ByteStream;
use crate::{Error, Result};

/// A single stage of a pipe, transforming one byte stream into another.
pub type Stage = Box<dyn FnOnce(ByteStream) -> ByteStream + Send>;

/// Shared completion handler for all streams of a build.
#[derive(Clone, Default)]
pub struct Supervisor {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    token: CancellationToken,
    failed: AtomicBool,
    failure: Mutex<Option<Error>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `source` through all `stages`, guarding every link.
    ///
    /// Data flows stage to stage in order. When any link yields an error, the error is reported
    /// to the supervisor and every guarded stream of the build ends.
    pub fn pipe(&self, source: ByteStream, stages: impl IntoIterator<Item = Stage>) -> ByteStream {
        stages
            .into_iter()
            .fold(self.guard(source), |stream, stage| self.guard(stage(stream)))
    }

    /// Guard a single stream.
    ///
    /// The returned stream never yields an error: errors are handed to the supervisor and end the
    /// stream, and so does a cancellation caused by any other stream.
    pub fn guard(&self, stream: ByteStream) -> ByteStream {
        let this = self.clone();
        stream
            .take_until(self.inner.token.clone().cancelled_owned())
            .scan((), move |_, chunk| {
                future::ready(match chunk {
                    Ok(chunk) => Some(Ok(chunk)),
                    Err(err) => {
                        this.fail(err);
                        None
                    }
                })
            })
            .boxed()
    }

    /// Record a failure. Only the first one is kept.
    pub fn fail(&self, err: Error) {
        if self.inner.failed.swap(true, Ordering::AcqRel) {
            tracing::debug!("suppressing subsequent failure: {err:#}");
            return;
        }

        tracing::debug!("first failure, cancelling all streams: {err:#}");
        *self
            .inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
        self.inner.token.cancel();
    }

    /// Whether a failure was recorded.
    pub fn is_failed(&self) -> bool {
        self.inner.failed.load(Ordering::Acquire)
    }

    /// The token cancelled on the first failure.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Take the outcome of the build.
    ///
    /// Returns the first failure, if any. A taken failure is not reported a second time.
    pub fn finish(&self) -> Result<()> {
        match self
            .inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wrap a finished stream so that it ends with the outcome of the build.
    ///
    /// The returned stream yields all data of `stream` and, once it ends, the first failure of the
    /// build as its last item.
    pub fn outcome(&self, stream: ByteStream) -> ByteStream {
        let this = self.clone();
        self.guard(stream)
            .chain(futures_util::stream::once(async move { this.finish() }).filter_map(
                |outcome| future::ready(outcome.err().map(Err)),
            ))
            .boxed()
    }
}
