//! Locality checks & relative URL algebra for inlined assets.
//!
//! Inlining moves the text of an asset out of the directory it was authored in and into the
//! document. Any relative reference inside that text has to be re-based onto the document's
//! directory, otherwise it resolves against the wrong folder once inlined.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use url::{ParseError, Url};

use super::path_to_href;

/// Check if a reference points to a local file which can be resolved at build time.
///
/// A reference is local when it is not an absolute URL (no scheme, so no network location
/// either), is not rooted at the server root (`/foo`, which includes protocol relative `//host`)
/// and is not a pure fragment (`#id`).
pub fn is_local(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('/') || reference.starts_with('#') {
        return false;
    }

    matches!(Url::parse(reference), Err(ParseError::RelativeUrlWithoutBase))
}

/// Split a reference into its path and its query/fragment suffix.
pub fn split_suffix(reference: &str) -> (&str, &str) {
    match reference.find(['?', '#']) {
        Some(idx) => reference.split_at(idx),
        None => (reference, ""),
    }
}

/// Resolve a local `href`/`src` attribute value to a file path below `base_dir`.
///
/// Query strings and fragments are dropped and percent-encoding is decoded, as neither is part of
/// the file name on disk.
pub fn resolve_asset_path(base_dir: &Path, reference: &str) -> PathBuf {
    let (path, _) = split_suffix(reference.trim());
    let path = percent_decode_str(path).decode_utf8_lossy();

    let mut relative = PathBuf::new();
    relative.extend(path.split('/').filter(|segment| !segment.is_empty()));

    normalize(&base_dir.join(relative))
}

/// Rewrite a reference embedded in an asset so that it stays valid after inlining.
///
/// The reference is resolved against the directory of the original asset and the result is
/// expressed relative to `base_dir`, the directory the document is rooted at. References which
/// are not local are returned as they are.
pub fn rewrite_embedded_url<'a>(
    asset_dir: &Path,
    base_dir: &Path,
    reference: &'a str,
) -> Cow<'a, str> {
    if !is_local(reference) {
        return Cow::Borrowed(reference);
    }

    let (path, suffix) = split_suffix(reference.trim());
    let mut relative = PathBuf::new();
    relative.extend(path.split('/').filter(|segment| !segment.is_empty()));
    let target = normalize(&asset_dir.join(relative));

    match pathdiff::diff_paths(&target, normalize(base_dir)) {
        Some(rebased) => Cow::Owned(format!("./{}{suffix}", path_to_href(rebased))),
        None => {
            tracing::debug!(reference, "unable to re-base reference, leaving it untouched");
            Cow::Borrowed(reference)
        }
    }
}

/// Lexically normalize a path, folding `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
