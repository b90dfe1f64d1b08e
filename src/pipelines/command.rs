//! External command plugins.

use std::borrow::Cow;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures_util::future::ready;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::io::ReaderStream;

use super::Plugin;
use crate::common::ByteStream;
use crate::config::{BuildConfig, CommandSpec};
use crate::{ErrorReason, Result, ResultExt};

pub const ENV_ASSET_PATH: &str = "INLINER_ASSET_PATH";
pub const ENV_BASE_DIR: &str = "INLINER_BASE_DIR";

/// Pipes an asset through an external command.
///
/// The asset is written to the stdin of the command, its stdout is the result. The command runs
/// in the folder of the asset. A bad exit status fails the asset with the stderr of the command.
#[derive(Clone, Debug)]
pub struct CommandPlugin {
    name: String,
    command: CommandSpec,
}

impl CommandPlugin {
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }
}

impl Plugin for CommandPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, path: &Path, input: ByteStream, cfg: &BuildConfig) -> ByteStream {
        let run = run(
            self.name.clone(),
            self.command.clone(),
            path.to_path_buf(),
            cfg.base_dir.clone(),
            input,
        );
        stream::once(run).try_flatten().boxed()
    }
}

#[tracing::instrument(level = "trace", skip(command, input))]
async fn run(
    name: String,
    command: CommandSpec,
    path: PathBuf,
    base_dir: PathBuf,
    mut input: ByteStream,
) -> Result<ByteStream> {
    let folder = path.parent().unwrap_or(&base_dir);
    tracing::debug!(args = ?command.args, "spawning {}", command.command);

    let spawn_failed = || ErrorReason::PluginCommandFailed {
        plugin: name.clone().into(),
        command: command.command.clone(),
    };
    let mut child = Command::new(&command.command)
        .args(&command.args)
        .current_dir(folder)
        .env(ENV_ASSET_PATH, &path)
        .env(ENV_BASE_DIR, &base_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_reason(spawn_failed)?;

    let mut stdin = child.stdin.take().with_reason(spawn_failed)?;
    let stdout = child.stdout.take().with_reason(spawn_failed)?;
    let mut stderr = child.stderr.take().with_reason(spawn_failed)?;

    let feeder = tokio::spawn(async move {
        while let Some(chunk) = input.next().await {
            let chunk = chunk?;
            if let Err(err) = stdin.write_all(&chunk).await {
                // the command stopped reading, its exit status tells what happened
                if err.kind() != ErrorKind::BrokenPipe {
                    tracing::debug!("error writing to plugin command: {err}");
                }
                return Ok(());
            }
        }
        Ok::<_, crate::Error>(())
    });

    let diagnostics = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(err) = stderr.read_to_end(&mut buf).await {
            tracing::debug!("error reading plugin command stderr: {err}");
        }
        String::from_utf8_lossy(&buf).trim().to_string()
    });

    let plugin: Cow<'static, str> = name.into();
    let program = command.command;
    let completion = {
        let plugin = plugin.clone();
        let program = program.clone();
        async move {
            feeder.await.reason(ErrorReason::TokioTaskFailed)??;
            let status = child
                .wait()
                .await
                .with_reason(|| ErrorReason::PluginCommandFailed {
                    plugin: plugin.clone(),
                    command: program,
                })?;
            let diagnostics = diagnostics.await.unwrap_or_default();

            if !status.success() {
                let message = match diagnostics.is_empty() {
                    true => format!("command exited with {status}"),
                    false => diagnostics,
                };
                return Err(ErrorReason::PluginFailed {
                    plugin,
                    path,
                    message,
                }
                .into_error());
            }

            if !diagnostics.is_empty() {
                tracing::debug!(%plugin, "{diagnostics}");
            }
            Ok(())
        }
    };

    let output = ReaderStream::new(stdout)
        .map(move |chunk| {
            chunk.with_reason(|| ErrorReason::PluginCommandFailed {
                plugin: plugin.clone(),
                command: program.clone(),
            })
        })
        .chain(stream::once(completion).filter_map(|outcome| ready(outcome.err().map(Err))));

    Ok(output.boxed())
}
