//! Build configuration.

mod models;
pub mod source;

pub use models::*;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use source::Source;

use crate::common::cwd;

/// Locate and load the configuration, given an optional file. Falling back to the current
/// directory, and to the defaults when nothing is found there.
pub fn load(path: Option<PathBuf>) -> Result<BuildConfig> {
    match path {
        Some(path) if path.is_file() => {
            // Canonicalize the path to the configuration, so that we get a proper parent.
            let path = dunce::canonicalize(&path).with_context(|| {
                format!(
                    "unable to canonicalize path to configuration: '{}'",
                    path.display()
                )
            })?;
            Source::File(path).load()
        }
        Some(path) if path.is_dir() => Source::find(&path).load(),
        Some(path) => bail!("{} is neither a file nor a directory", path.display()),
        None => Source::find(cwd()).load(),
    }
}
