//! Streaming element rewrites on top of `lol_html`.
//!
//! The rewriter of `lol_html` is not `Send` and its handlers are synchronous, while the content
//! which replaces an element is an asynchronous byte stream. The rewriter is therefore driven on a
//! blocking thread: every element which receives streamed content is replaced by a unique slot
//! marker, and the markers are spliced back out of the rewriter output, each one swapped against
//! the receiving end of that element's content channel. The consumer reads the segments strictly in
//! order, so the document structure is preserved no matter which content finishes first.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use lol_html::errors::RewritingError;
use lol_html::html_content::{ContentType, Element};
use lol_html::{HtmlRewriter, Selector, Settings, element};
use memchr::memmem;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::ByteStream;
use crate::{Error, ErrorExt, ErrorReason, Result, ResultExt};

/// Chunks buffered between the rewriter thread and its consumer.
const SEGMENT_CAPACITY: usize = 64;
/// Chunks buffered per streamed element content.
const SLOT_CAPACITY: usize = 16;

const MARKER_START: &str = "<!--inline-slot:";
const MARKER_END: &str = "-->";
/// `<!--inline-slot:` + 16 hex nonce + `:` + 8 hex id + `-->`
const MARKER_LEN: usize = MARKER_START.len() + 16 + 1 + 8 + MARKER_END.len();

/// A handler invoked for every element matching a selector.
pub type ElementHandler = Box<dyn FnMut(&mut ElementRef<'_, '_, '_>) -> Result<()> + Send>;

/// Which part of an element is replaced by streamed content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentTarget {
    /// Keep the element tags, replace what is between them.
    Inner,
    /// Replace the element including its tags.
    Outer,
}

/// A set of element handlers, run over a byte stream of HTML.
#[derive(Default)]
pub struct HtmlRewrite {
    handlers: Vec<(String, ElementHandler)>,
}

impl HtmlRewrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every element matching `selector`.
    ///
    /// The selector is validated right away.
    pub fn select_all<F>(mut self, selector: &str, handler: F) -> Result<Self>
    where
        F: FnMut(&mut ElementRef<'_, '_, '_>) -> Result<()> + Send + 'static,
    {
        selector
            .parse::<Selector>()
            .with_reason(|| ErrorReason::HtmlSelectorInvalid {
                selector: selector.to_string(),
            })?;
        self.handlers.push((selector.to_string(), Box::new(handler)));
        Ok(self)
    }

    /// Rewrite `input`, returning the rewritten document as a stream.
    ///
    /// Must be called from within a Tokio runtime. Any failure, from the input, a handler or any
    /// streamed element content, ends the output with that error.
    pub fn run(self, mut input: ByteStream) -> ByteStream {
        let runtime = Handle::current();
        let (input_tx, input_rx) = mpsc::channel::<Result<Bytes>>(SEGMENT_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel::<Segment>(SEGMENT_CAPACITY);

        runtime.spawn(async move {
            while let Some(chunk) = input.next().await {
                let failed = chunk.is_err();
                if input_tx.send(chunk).await.is_err() || failed {
                    break;
                }
            }
        });

        let failure_tx = output_tx.clone();
        let handlers = self.handlers;
        let task = tokio::task::spawn_blocking(move || {
            rewrite_blocking(handlers, runtime, input_rx, output_tx)
        });
        tokio::spawn(async move {
            if let Err(err) = task.await {
                let err = err.reason(ErrorReason::TokioTaskFailed);
                let _ = failure_tx.send(Segment::Failed(err)).await;
            }
        });

        ReceiverStream::new(output_rx)
            .flat_map(Segment::into_stream)
            .boxed()
    }
}

/// An element matched by a selector.
pub struct ElementRef<'a, 'r, 't> {
    element: &'a mut Element<'r, 't>,
    slots: &'a Slots,
}

impl ElementRef<'_, '_, '_> {
    pub fn tag_name(&self) -> String {
        self.element.tag_name()
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.element.get_attribute(name)
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        self.element
            .set_attribute(name, value)
            .with_reason(|| ErrorReason::HtmlAttributeInvalid {
                name: name.to_string(),
            })
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.element.remove_attribute(name);
    }

    /// All attributes, as name and value, in source order.
    pub fn attributes(&self) -> Vec<(String, String)> {
        self.element
            .attributes()
            .iter()
            .map(|attr| (attr.name(), attr.value()))
            .collect()
    }

    /// Replace the element, or its content, with a stream.
    ///
    /// The stream is driven on its own task and written at the position of the element.
    pub fn replace_with_stream(&mut self, target: ContentTarget, mut content: ByteStream) {
        let (tx, rx) = mpsc::channel(SLOT_CAPACITY);
        let marker = self.slots.register(rx);
        match target {
            ContentTarget::Inner => self.element.set_inner_content(&marker, ContentType::Html),
            ContentTarget::Outer => self.element.replace(&marker, ContentType::Html),
        }

        self.slots.runtime.spawn(async move {
            while let Some(chunk) = content.next().await {
                let failed = chunk.is_err();
                if tx.send(chunk).await.is_err() || failed {
                    break;
                }
            }
        });
    }
}

/// A piece of the rewritten document.
enum Segment {
    Html(Bytes),
    Slot(mpsc::Receiver<Result<Bytes>>),
    Failed(Error),
}

impl Segment {
    fn into_stream(self) -> ByteStream {
        match self {
            Self::Html(html) => stream::iter([Ok(html)]).boxed(),
            Self::Slot(rx) => ReceiverStream::new(rx).boxed(),
            Self::Failed(err) => stream::iter([Err(err)]).boxed(),
        }
    }
}

/// Content channels waiting for their marker to show up in the output.
struct Slots {
    nonce: u64,
    runtime: Handle,
    next_id: Cell<u32>,
    pending: RefCell<HashMap<u32, mpsc::Receiver<Result<Bytes>>>>,
}

impl Slots {
    fn register(&self, rx: mpsc::Receiver<Result<Bytes>>) -> String {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        self.pending.borrow_mut().insert(id, rx);
        format!("{MARKER_START}{:016x}:{id:08x}{MARKER_END}", self.nonce)
    }

    fn take(&self, id: u32) -> Option<mpsc::Receiver<Result<Bytes>>> {
        self.pending.borrow_mut().remove(&id)
    }
}

/// Splits the rewriter output into segments at the slot markers.
struct Splicer {
    prefix: Vec<u8>,
    carry: Vec<u8>,
    slots: Rc<Slots>,
    output: mpsc::Sender<Segment>,
    closed: bool,
}

impl Splicer {
    fn new(slots: Rc<Slots>, output: mpsc::Sender<Segment>) -> Self {
        Self {
            prefix: format!("{MARKER_START}{:016x}:", slots.nonce).into_bytes(),
            carry: Vec::new(),
            slots,
            output,
            closed: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);

        loop {
            let Some(start) = memmem::find(&self.carry, &self.prefix) else {
                // keep a partial marker at the tail for the next chunk
                let keep = (1..self.prefix.len())
                    .rev()
                    .find(|len| self.carry.ends_with(&self.prefix[..*len]))
                    .unwrap_or(0);
                let html = self.carry.drain(..self.carry.len() - keep).collect::<Vec<_>>();
                self.emit_html(html);
                return;
            };

            if self.carry.len() < start + MARKER_LEN {
                let html = self.carry.drain(..start).collect::<Vec<_>>();
                self.emit_html(html);
                return;
            }

            let html = self.carry.drain(..start).collect::<Vec<_>>();
            self.emit_html(html);

            let marker = self.carry.drain(..MARKER_LEN).collect::<Vec<_>>();
            match self.parse_id(&marker).and_then(|id| self.slots.take(id)) {
                Some(rx) => self.emit(Segment::Slot(rx)),
                None => self.emit_html(marker),
            }
        }
    }

    fn parse_id(&self, marker: &[u8]) -> Option<u32> {
        let id = marker.get(self.prefix.len()..self.prefix.len() + 8)?;
        if !marker.ends_with(MARKER_END.as_bytes()) {
            return None;
        }
        u32::from_str_radix(std::str::from_utf8(id).ok()?, 16).ok()
    }

    fn finish(&mut self) {
        let rest = std::mem::take(&mut self.carry);
        self.emit_html(rest);
    }

    fn emit_html(&mut self, html: Vec<u8>) {
        if !html.is_empty() {
            self.emit(Segment::Html(Bytes::from(html)));
        }
    }

    fn emit(&mut self, segment: Segment) {
        if !self.closed && self.output.blocking_send(segment).is_err() {
            self.closed = true;
        }
    }
}

fn rewrite_blocking(
    handlers: Vec<(String, ElementHandler)>,
    runtime: Handle,
    mut input: mpsc::Receiver<Result<Bytes>>,
    output: mpsc::Sender<Segment>,
) {
    let slots = Rc::new(Slots {
        nonce: rand::random(),
        runtime,
        next_id: Cell::new(0),
        pending: RefCell::new(HashMap::new()),
    });
    let splicer = Rc::new(RefCell::new(Splicer::new(slots.clone(), output.clone())));

    let element_content_handlers = handlers
        .into_iter()
        .map(|(selector, mut handler)| {
            let slots = slots.clone();
            element!(selector, move |el| {
                let mut element = ElementRef {
                    element: el,
                    slots: &slots,
                };
                handler(&mut element)?;
                Ok(())
            })
        })
        .collect::<Vec<_>>();

    let sink = {
        let splicer = splicer.clone();
        move |chunk: &[u8]| splicer.borrow_mut().push(chunk)
    };
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers,
            ..Settings::default()
        },
        sink,
    );

    let fail = |err: Error| {
        let _ = output.blocking_send(Segment::Failed(err));
    };

    while let Some(chunk) = input.blocking_recv() {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => return fail(err),
        };
        if let Err(err) = rewriter.write(&chunk) {
            return fail(rewriting_error(err));
        }
        if splicer.borrow().closed {
            tracing::trace!("rewrite output was dropped, stopping");
            return;
        }
    }

    if let Err(err) = rewriter.end() {
        return fail(rewriting_error(err));
    }
    splicer.borrow_mut().finish();
}

fn rewriting_error(err: RewritingError) -> Error {
    match err {
        RewritingError::ContentHandlerError(err) => match err.downcast::<Error>() {
            Ok(err) => *err,
            Err(err) => ErrorReason::HtmlRewriteFailed.into_error_with(err),
        },
        other => other.reason(ErrorReason::HtmlRewriteFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn input(chunks: &[&str]) -> ByteStream {
        let chunks = chunks
            .iter()
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk.as_bytes())))
            .collect::<Vec<_>>();
        stream::iter(chunks).boxed()
    }

    fn bytewise(doc: &str) -> ByteStream {
        let chunks = doc
            .as_bytes()
            .iter()
            .map(|b| Ok(Bytes::copy_from_slice(&[*b])))
            .collect::<Vec<_>>();
        stream::iter(chunks).boxed()
    }

    async fn collect(mut output: ByteStream) -> Result<String> {
        let mut buf = Vec::new();
        while let Some(chunk) = output.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    #[tokio::test]
    async fn untouched_without_matches() -> Result<()> {
        let doc = "<html><head><title>t</title></head><body><p>hi</p></body></html>";
        let out = HtmlRewrite::new()
            .select_all("script[src]", |_| Ok(()))?
            .run(input(&[&doc[..10], &doc[10..31], &doc[31..]]));
        assert_eq!(collect(out).await?, doc);
        Ok(())
    }

    #[tokio::test]
    async fn streams_keep_document_order() -> Result<()> {
        let doc = r#"<div><p id="slow">x</p><p id="fast">y</p></div>"#;
        let out = HtmlRewrite::new()
            .select_all("p", |el| {
                let id = el.get_attribute("id").unwrap_or_default();
                let delay = if id == "slow" { 50 } else { 0 };
                let content = stream::once(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(Bytes::from(format!("[{id}]")))
                })
                .chain(stream::iter([Ok(Bytes::from_static(b"!"))]))
                .boxed();
                el.replace_with_stream(ContentTarget::Outer, content);
                Ok(())
            })?
            .run(bytewise(doc));
        assert_eq!(collect(out).await?, "<div>[slow]![fast]!</div>");
        Ok(())
    }

    #[tokio::test]
    async fn inner_content_and_attributes() -> Result<()> {
        let doc = r#"<script src="a.js" defer></script>"#;
        let out = HtmlRewrite::new()
            .select_all("script[src]", |el| {
                let src = el.get_attribute("src").unwrap_or_default();
                assert_eq!(
                    el.attributes(),
                    vec![("src".into(), "a.js".into()), ("defer".into(), "".into())]
                );
                el.set_attribute("data-src", &src)?;
                el.remove_attribute("src");
                el.replace_with_stream(
                    ContentTarget::Inner,
                    input(&["let a = 1;", "</b>"]),
                );
                Ok(())
            })?
            .run(input(&[doc]));
        assert_eq!(
            collect(out).await?,
            r#"<script defer data-src="a.js">let a = 1;</b></script>"#
        );
        Ok(())
    }

    #[tokio::test]
    async fn invalid_selector() {
        let err = HtmlRewrite::new()
            .select_all("link[rel=", |_| Ok(()))
            .err()
            .expect("selector must be rejected");
        assert!(matches!(
            *err.reason,
            ErrorReason::HtmlSelectorInvalid { .. }
        ));
    }

    #[tokio::test]
    async fn handler_failure_ends_output() -> Result<()> {
        let out = HtmlRewrite::new()
            .select_all("link", |_| {
                Err(ErrorReason::FsNotExist {
                    path: "missing.css".into(),
                }
                .into_error())
            })?
            .run(input(&["<head><link href=missing.css></head>"]));
        let err = collect(out).await.expect_err("handler error must surface");
        assert!(matches!(*err.reason, ErrorReason::FsNotExist { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn content_failure_ends_output() -> Result<()> {
        let out = HtmlRewrite::new()
            .select_all("p", |el| {
                let content = stream::iter([
                    Ok(Bytes::from_static(b"partial")),
                    Err(ErrorReason::EntryReadFailed.into_error()),
                ])
                .boxed();
                el.replace_with_stream(ContentTarget::Outer, content);
                Ok(())
            })?
            .run(input(&["<p>a</p><p>b</p>"]));
        let err = collect(out).await.expect_err("content error must surface");
        assert!(matches!(*err.reason, ErrorReason::EntryReadFailed));
        Ok(())
    }

    #[tokio::test]
    async fn input_failure_ends_output() {
        let doc = stream::iter([
            Ok(Bytes::from_static(b"<p>a</p>")),
            Err(ErrorReason::EntryReadFailed.into_error()),
        ])
        .boxed();
        let out = HtmlRewrite::new().run(doc);
        let err = collect(out).await.expect_err("input error must surface");
        assert!(matches!(*err.reason, ErrorReason::EntryReadFailed));
    }
}
