//! Regex replacements over byte streams.
//!
//! Matches may span chunk boundaries, so a tail of every chunk is held back until the next chunk
//! arrives. Matches longer than the held back window are not found.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::bytes::{Captures, Regex};

use crate::common::ByteStream;
use crate::common::url::rewrite_embedded_url;

/// Bytes held back between chunks.
pub const DEFAULT_WINDOW: usize = 4096;

#[allow(clippy::expect_used)]
static CSS_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]*))\s*\)|@import\s+(?:"([^"]*)"|'([^']*)')"#,
    )
    .expect("css reference regex must compile")
});

#[allow(clippy::expect_used)]
static CLOSING_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(script)").expect("closing script regex must compile"));

/// Replace all matches of `regex` in a byte stream.
///
/// The replacement for every match is computed by `replace` from its captures.
pub fn replace_all<F>(input: ByteStream, regex: Regex, window: usize, replace: F) -> ByteStream
where
    F: FnMut(&Captures<'_>) -> Vec<u8> + Send + 'static,
{
    let replacer = Replacer {
        regex,
        window,
        replace,
        carry: Vec::new(),
    };

    stream::unfold(Some((input, replacer)), |state| async move {
        let (mut input, mut replacer) = state?;
        loop {
            match input.next().await {
                Some(Ok(chunk)) => {
                    let out = replacer.push(&chunk);
                    if !out.is_empty() {
                        return Some((Ok(out), Some((input, replacer))));
                    }
                }
                Some(Err(err)) => return Some((Err(err), None)),
                None => {
                    let out = replacer.finish();
                    return (!out.is_empty()).then_some((Ok(out), None));
                }
            }
        }
    })
    .boxed()
}

/// Re-base every local `url(...)` and `@import "..."` reference of a stylesheet.
///
/// References are resolved against `asset_dir`, the folder of the stylesheet, and rewritten
/// relative to `base_dir`.
pub fn rewrite_css_urls(input: ByteStream, asset_dir: PathBuf, base_dir: PathBuf) -> ByteStream {
    replace_all(input, CSS_REFERENCE.clone(), DEFAULT_WINDOW, move |caps| {
        rewrite_reference(caps, &asset_dir, &base_dir)
    })
}

/// Escape every closing script tag, keeping its case: `</script>` becomes `<\/script>`.
pub fn escape_closing_script(input: ByteStream) -> ByteStream {
    replace_all(input, CLOSING_SCRIPT.clone(), DEFAULT_WINDOW, |caps| {
        let mut out = b"<\\/".to_vec();
        out.extend_from_slice(&caps[1]);
        out
    })
}

fn rewrite_reference(caps: &Captures<'_>, asset_dir: &Path, base_dir: &Path) -> Vec<u8> {
    let whole = &caps[0];
    let Some(reference) = (1..caps.len()).find_map(|idx| caps.get(idx)) else {
        return whole.to_vec();
    };
    let Ok(value) = std::str::from_utf8(reference.as_bytes()) else {
        return whole.to_vec();
    };

    let rewritten = rewrite_embedded_url(asset_dir, base_dir, value);
    if rewritten == value {
        return whole.to_vec();
    }

    let offset = caps.get(0).map(|m| m.start()).unwrap_or_default();
    let (start, end) = (reference.start() - offset, reference.end() - offset);
    let mut out = Vec::with_capacity(whole.len() + rewritten.len());
    out.extend_from_slice(&whole[..start]);
    out.extend_from_slice(rewritten.as_bytes());
    out.extend_from_slice(&whole[end..]);
    out
}

struct Replacer<F> {
    regex: Regex,
    window: usize,
    replace: F,
    carry: Vec<u8>,
}

impl<F> Replacer<F>
where
    F: FnMut(&Captures<'_>) -> Vec<u8>,
{
    fn push(&mut self, chunk: &[u8]) -> Bytes {
        self.carry.extend_from_slice(chunk);
        self.process(false)
    }

    fn finish(&mut self) -> Bytes {
        self.process(true)
    }

    fn process(&mut self, last: bool) -> Bytes {
        let Self {
            regex,
            window,
            replace,
            carry,
        } = self;

        let safe_end = if last {
            carry.len()
        } else {
            carry.len().saturating_sub(*window)
        };

        let mut out = Vec::with_capacity(carry.len());
        let mut copied = 0;
        for caps in regex.captures_iter(carry.as_slice()) {
            let Some(m) = caps.get(0) else { continue };
            if !last && m.start() >= safe_end {
                break;
            }
            out.extend_from_slice(&carry[copied..m.start()]);
            out.extend_from_slice(&replace(&caps));
            copied = m.end();
        }

        let keep_from = copied.max(safe_end);
        out.extend_from_slice(&carry[copied..keep_from]);
        carry.drain(..keep_from);

        Bytes::from(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    fn chunked(text: &str, size: usize) -> ByteStream {
        let chunks = text
            .as_bytes()
            .chunks(size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect::<Vec<_>>();
        stream::iter(chunks).boxed()
    }

    async fn collect(mut stream: ByteStream) -> Result<String> {
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    #[tokio::test]
    async fn css_references_are_rebased() -> Result<()> {
        let css = r#"@import "normalize.css";
.a { background: url("../img/main.jpg"); }
.b { background: url('h1.jpg') no-repeat; }
.c { background: url( fonts/x.woff?#iefix ); }
.d { background: url(/foo.jpg), url(http://www.reelcontent.com/foo.jpg); }
.e { filter: url(#blur); mask: URL(data:image/png;base64,AAAA); }
"#;
        let expected = r#"@import "./css/normalize.css";
.a { background: url("./img/main.jpg"); }
.b { background: url('./css/h1.jpg') no-repeat; }
.c { background: url( ./css/fonts/x.woff?#iefix ); }
.d { background: url(/foo.jpg), url(http://www.reelcontent.com/foo.jpg); }
.e { filter: url(#blur); mask: URL(data:image/png;base64,AAAA); }
"#;
        for size in [1, 3, 7, css.len()] {
            let out = rewrite_css_urls(
                chunked(css, size),
                PathBuf::from("/site/css"),
                PathBuf::from("/site"),
            );
            assert_eq!(collect(out).await?, expected, "chunk size {size}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn closing_script_is_escaped() -> Result<()> {
        let js = r#"document.write("<script></script>"); var s = "</SCRIPT >";"#;
        let expected = r#"document.write("<script><\/script>"); var s = "<\/SCRIPT >";"#;
        for size in [1, 2, 5, js.len()] {
            let out = escape_closing_script(chunked(js, size));
            assert_eq!(collect(out).await?, expected, "chunk size {size}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn small_window_still_matches_across_chunks() -> Result<()> {
        let regex = Regex::new("abc").expect("valid regex");
        let input = chunked("xxabcxxab", 2).chain(chunked("cx", 1)).boxed();
        let out = replace_all(input, regex, 3, |_| b"-".to_vec());
        assert_eq!(collect(out).await?, "xx-xx-x");
        Ok(())
    }

    #[tokio::test]
    async fn errors_are_passed_through() {
        let input = stream::iter([
            Ok(Bytes::from_static(b"a</script>")),
            Err(crate::ErrorReason::EntryReadFailed.into_error()),
        ])
        .boxed();
        let items = escape_closing_script(input).collect::<Vec<_>>().await;
        assert!(matches!(items.last(), Some(Err(_))));
    }
}
