//! Inline local stylesheets & scripts into a single self-contained HTML document.
//!
//! Every build runs in a separate worker process. The [`Builder`] starts the worker, forwards the
//! entry document to it and hands back the finished document as a stream:
//!
//! ```no_run
//! # async fn run() -> inliner::Result<()> {
//! use inliner::{BuildConfig, Builder};
//!
//! let builder = Builder::new(BuildConfig::default());
//! let html = builder.build(std::path::Path::new("index.html")).into_bytes().await?;
//! # Ok(())
//! # }
//! ```
#![deny(clippy::unwrap_used)]

mod build;
mod error;
mod worker;

pub mod common;
pub mod config;
pub mod pipelines;
pub mod processing;
pub mod supervisor;

pub use build::{Builder, Entry};
pub use config::{BuildConfig, BuiltinPlugin, CommandSpec, PluginSpec, Plugins};
pub use error::{Error, ErrorExt, ErrorReason, Result, ResultExt};
pub use worker::{BuildOutput, WorkerCommand, WorkerState};
