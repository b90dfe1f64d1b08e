//! Worker process host.
//!
//! A build runs in a separate worker process. The host forwards the entry document to the stdin
//! of the worker and hands the stdout of the worker to the caller. The outcome of the build is
//! decided by the exit status of the worker; on failure, the last line the worker printed to its
//! stderr is the error message.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;

use crate::build::Entry;
use crate::common::ByteStream;
use crate::config::BuildConfig;
use crate::{Error, ErrorExt, ErrorReason, Result, ResultExt};

/// The command starting a worker process.
///
/// The serialized build configuration and plugin lists are appended as the last two arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The hidden `worker` subcommand of the running executable.
    ///
    /// Falls back to looking up the executable by name when the path of the running executable
    /// is unknown.
    pub fn current_exe() -> Self {
        let program = std::env::current_exe()
            .map(OsString::from)
            .unwrap_or_else(|_| OsString::from(env!("CARGO_PKG_NAME")));
        Self::new(program).arg("worker").arg("--quiet")
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self::current_exe()
    }
}

/// The states of a worker during a build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum WorkerState {
    Spawned,
    Streaming,
    Completed,
    Failed,
}

/// Start a worker for a build.
///
/// Never fails right away, all failures are reported through the returned output.
pub(crate) fn start(command: &WorkerCommand, cfg: &BuildConfig, entry: Entry) -> BuildOutput {
    match spawn(command, cfg, entry) {
        Ok(output) => output,
        Err(err) => {
            tracing::debug!(state = %WorkerState::Failed, "worker failed to start: {err:#}");
            BuildOutput::failed(err)
        }
    }
}

fn spawn(command: &WorkerCommand, cfg: &BuildConfig, entry: Entry) -> Result<BuildOutput> {
    let config = serde_json::to_string(cfg).reason(ErrorReason::WorkerArgsInvalid)?;
    let plugins = serde_json::to_string(&cfg.plugins).reason(ErrorReason::WorkerArgsInvalid)?;

    let spawn_failed = || ErrorReason::WorkerSpawnFailed {
        program: command.program.to_string_lossy().to_string(),
    };
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .arg(config)
        .arg(plugins)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_reason(spawn_failed)?;
    tracing::debug!(state = %WorkerState::Spawned, pid = ?child.id(), "worker");

    let stdin = child.stdin.take().with_reason(spawn_failed)?;
    let stdout = child.stdout.take().with_reason(spawn_failed)?;
    let stderr = child.stderr.take().with_reason(spawn_failed)?;

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = supervise(child, stdin, stderr, entry).await;
        let state = match &outcome {
            Ok(()) => WorkerState::Completed,
            Err(_) => WorkerState::Failed,
        };
        tracing::debug!(%state, "worker");
        // the receiver is gone when the caller dropped the output
        let _ = tx.send(outcome);
    });

    Ok(BuildOutput::new(stdout, rx))
}

async fn supervise(
    mut child: Child,
    stdin: ChildStdin,
    stderr: ChildStderr,
    entry: Entry,
) -> Result<()> {
    let diagnostics = tokio::spawn(last_diagnostic(stderr));
    tracing::debug!(state = %WorkerState::Streaming, "worker");

    if let Err(err) = forward(entry, stdin).await {
        if let Err(kill) = child.kill().await {
            tracing::debug!("error killing worker: {kill}");
        }
        return Err(err);
    }

    let status = child.wait().await.reason(ErrorReason::WorkerWaitFailed)?;
    let diagnostic = diagnostics.await.unwrap_or_default();
    match status.success() {
        true => Ok(()),
        false => Err(ErrorReason::WorkerFailed { status, diagnostic }.into_error()),
    }
}

/// Copy the entry document into the worker.
///
/// Only failures of the entry are errors. When the worker stops reading, forwarding stops and the
/// exit status of the worker tells what happened.
async fn forward(entry: Entry, mut stdin: ChildStdin) -> Result<()> {
    let reader: Box<dyn AsyncRead + Send + Unpin> = match entry {
        Entry::Path(path) => match File::open(&path).await {
            Ok(file) => Box::new(file),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(err.reason(ErrorReason::EntryNotExist { path }));
            }
            Err(err) => return Err(err.reason(ErrorReason::EntryReadFailed)),
        },
        Entry::Reader(reader) => reader,
    };

    let mut chunks = ReaderStream::new(reader);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.reason(ErrorReason::EntryReadFailed)?;
        if let Err(err) = stdin.write_all(&chunk).await {
            tracing::debug!("worker stopped reading its input: {err}");
            return Ok(());
        }
    }

    if let Err(err) = stdin.shutdown().await {
        tracing::debug!("error closing worker input: {err}");
    }
    Ok(())
}

/// Forward the stderr of the worker to the log, returning its last non-empty line.
async fn last_diagnostic(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!("worker: {line}");
                if !line.trim().is_empty() {
                    last = line.trim_end().to_string();
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!("error reading worker diagnostics: {err}");
                break;
            }
        }
    }
    last
}

/// The output of a build.
///
/// Yields the finished document. A failed build ends with a single error item, and only a build
/// whose worker exited successfully ends without one.
pub struct BuildOutput {
    inner: ByteStream,
}

impl BuildOutput {
    fn new(stdout: ChildStdout, outcome: oneshot::Receiver<Result<()>>) -> Self {
        let inner = stream::unfold(
            Some((ReaderStream::new(stdout), outcome)),
            |state| async move {
                let (mut stdout, outcome) = state?;
                match stdout.next().await {
                    Some(Ok(chunk)) => Some((Ok(chunk), Some((stdout, outcome)))),
                    Some(Err(err)) => {
                        // a failed worker explains better why its output broke off
                        let err = match outcome.await {
                            Ok(Err(failure)) => failure,
                            _ => err.reason(ErrorReason::WorkerOutputFailed),
                        };
                        Some((Err(err), None))
                    }
                    None => match outcome.await {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some((Err(err), None)),
                        Err(_) => Some((Err(ErrorReason::WorkerLost.into_error()), None)),
                    },
                }
            },
        )
        .fuse()
        .boxed();

        Self { inner }
    }

    /// An output which only carries a failure.
    pub fn failed(err: Error) -> Self {
        Self {
            inner: stream::iter([Err(err)]).boxed(),
        }
    }

    /// Write the complete output to `writer`.
    pub async fn write_to<W>(mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(chunk) = self.next().await {
            writer
                .write_all(&chunk?)
                .await
                .reason(ErrorReason::OutputWriteFailed)?;
        }
        writer.flush().await.reason(ErrorReason::OutputWriteFailed)
    }

    /// Collect the complete output.
    pub async fn into_bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for BuildOutput {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
