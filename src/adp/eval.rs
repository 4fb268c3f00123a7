//! ADP frame and evaluator (spec.md §4.H "Evaluator" and "Exceptions").
//! Exceptions are modeled as a plain result variant inspected by the frame
//! loop (spec.md §9: "Do not use the host language's exception machinery").

use std::collections::HashMap;

use tracing::warn;

use crate::adp::parser::{self, Block};
use crate::adp::tags::TagRegistry;
use crate::adp::MAX_INCLUDE_DEPTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Ok,
    Return,
    Break,
    Abort,
    Overflow,
}

/// Per-include execution context (spec.md §3 "ADP frame"). Owned by the
/// handling worker; [`Evaluator::run`] pushes a fresh one per include.
pub struct AdpFrame {
    pub file: String,
    pub cwd: String,
    pub argv: Vec<String>,
    pub output_buffer: String,
    pub exception: Exception,
    pub depth: usize,
    pub mimetype: String,
    pub charset: String,
    pub debug_info: Vec<String>,
    pub stream: bool,
    /// Per-request scalar storage for [`crate::adp::BasicEngine`]'s `set`/`$name`
    /// primitives. A real embedded interpreter would keep its own instead.
    pub vars: HashMap<String, String>,
    headers_sent: bool,
}

impl AdpFrame {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            cwd: String::new(),
            argv: Vec::new(),
            output_buffer: String::new(),
            exception: Exception::Ok,
            depth: 0,
            mimetype: "text/html".to_string(),
            charset: "utf-8".to_string(),
            debug_info: Vec::new(),
            stream: false,
            vars: HashMap::new(),
            headers_sent: false,
        }
    }

    /// Per-request state cleanup once the outer include returns (spec.md
    /// §4.H "Per-request state cleanup"), so the next request handled by
    /// the same worker starts clean.
    pub fn reset(&mut self) {
        *self = AdpFrame::new(std::mem::take(&mut self.file));
    }
}

pub enum ScriptOutcome {
    Value(String),
    Error(String),
}

/// Seam for the embedded scripting language. Embedding a real interpreter is
/// out of scope (spec.md §1); [`crate::adp::BasicEngine`] is the trivial
/// built-in that keeps the crate runnable without one. `Send + Sync` because
/// workers share one engine behind an `Arc`.
pub trait ScriptEngine: Send + Sync {
    fn eval(&self, source: &str, frame: &mut AdpFrame) -> ScriptOutcome;

    fn eval_tag(
        &self,
        name: &str,
        attrs: &HashMap<String, String>,
        body: Option<&str>,
        frame: &mut AdpFrame,
    ) -> ScriptOutcome;
}

pub struct Evaluator<'a> {
    tags: &'a TagRegistry,
    engine: &'a dyn ScriptEngine,
}

impl<'a> Evaluator<'a> {
    pub fn new(tags: &'a TagRegistry, engine: &'a dyn ScriptEngine) -> Self {
        Self { tags, engine }
    }

    /// Evaluates one ADP page (top-level dispatch or a nested include) in
    /// `frame`. `flush` is called whenever streaming is active and the
    /// buffer should go out over the connection now; it receives a flag for
    /// whether headers need to be emitted first (spec.md §4.H "Streaming":
    /// "emit headers on first flush").
    pub fn run(&self, source: &str, frame: &mut AdpFrame, flush: &mut dyn FnMut(bool, &[u8])) -> Exception {
        if frame.depth >= MAX_INCLUDE_DEPTH {
            frame.exception = Exception::Overflow;
            return Exception::Overflow;
        }

        let blocks = parser::parse(source, self.tags);
        for block in blocks {
            match block {
                Block::Text(text) => {
                    frame.output_buffer.push_str(&text);
                    self.maybe_flush(frame, flush);
                }
                Block::Script { source, append_result } => {
                    match self.engine.eval(&source, frame) {
                        ScriptOutcome::Value(v) => {
                            if append_result {
                                frame.output_buffer.push_str(&v);
                            }
                        }
                        ScriptOutcome::Error(message) => {
                            warn!(file = %frame.file, chunk = source.len(), %message, "adp script error");
                        }
                    }
                    self.maybe_flush(frame, flush);
                }
                Block::TagInvoke { name, attrs, body, .. } => {
                    let outcome = self.engine.eval_tag(&name, &attrs, body.as_deref(), frame);
                    match outcome {
                        ScriptOutcome::Value(v) => frame.output_buffer.push_str(&v),
                        ScriptOutcome::Error(message) => {
                            warn!(file = %frame.file, tag = %name, %message, "adp tag error");
                        }
                    }
                    self.maybe_flush(frame, flush);
                }
                Block::EnableStreaming => {
                    frame.stream = true;
                }
            }

            match frame.exception {
                Exception::Ok => continue,
                // RETURN only unwinds the current frame; the caller (the
                // include site) proceeds normally, so report OK upward.
                Exception::Return => return Exception::Ok,
                other => return other,
            }
        }
        Exception::Ok
    }

    fn maybe_flush(&self, frame: &mut AdpFrame, flush: &mut dyn FnMut(bool, &[u8])) {
        if !frame.stream || frame.output_buffer.is_empty() {
            return;
        }
        let headers_first = !frame.headers_sent;
        frame.headers_sent = true;
        flush(headers_first, frame.output_buffer.as_bytes());
        frame.output_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adp::tags::TagKind;

    struct EchoEngine;
    impl ScriptEngine for EchoEngine {
        fn eval(&self, source: &str, _frame: &mut AdpFrame) -> ScriptOutcome {
            ScriptOutcome::Value(format!("[{source}]"))
        }
        fn eval_tag(
            &self,
            name: &str,
            _attrs: &HashMap<String, String>,
            body: Option<&str>,
            _frame: &mut AdpFrame,
        ) -> ScriptOutcome {
            ScriptOutcome::Value(format!("<{name}:{}>", body.unwrap_or("")))
        }
    }

    struct ReturnEngine;
    impl ScriptEngine for ReturnEngine {
        fn eval(&self, _source: &str, frame: &mut AdpFrame) -> ScriptOutcome {
            frame.exception = Exception::Return;
            ScriptOutcome::Value(String::new())
        }
        fn eval_tag(
            &self,
            _name: &str,
            _attrs: &HashMap<String, String>,
            _body: Option<&str>,
            _frame: &mut AdpFrame,
        ) -> ScriptOutcome {
            ScriptOutcome::Value(String::new())
        }
    }

    #[test]
    fn text_and_append_result_concatenate_into_buffer() {
        let tags = TagRegistry::new();
        let engine = EchoEngine;
        let eval = Evaluator::new(&tags, &engine);
        let mut frame = AdpFrame::new("page.adp");
        let mut sink = |_headers: bool, _bytes: &[u8]| {};
        let result = eval.run("a<%= 1 %>b", &mut frame, &mut sink);
        assert_eq!(result, Exception::Ok);
        assert_eq!(frame.output_buffer, "a[ 1 ]b");
    }

    #[test]
    fn return_exception_stops_frame_but_reports_ok() {
        let tags = TagRegistry::new();
        let engine = ReturnEngine;
        let eval = Evaluator::new(&tags, &engine);
        let mut frame = AdpFrame::new("page.adp");
        let mut sink = |_headers: bool, _bytes: &[u8]| {};
        let result = eval.run("before<% ret %>after", &mut frame, &mut sink);
        assert_eq!(result, Exception::Ok);
        assert_eq!(frame.output_buffer, "before");
    }

    #[test]
    fn overflow_is_reported_when_depth_exceeds_limit() {
        let tags = TagRegistry::new();
        let engine = EchoEngine;
        let eval = Evaluator::new(&tags, &engine);
        let mut frame = AdpFrame::new("page.adp");
        frame.depth = MAX_INCLUDE_DEPTH;
        let mut sink = |_headers: bool, _bytes: &[u8]| {};
        let result = eval.run("x", &mut frame, &mut sink);
        assert_eq!(result, Exception::Overflow);
    }

    #[test]
    fn streaming_flushes_buffer_and_tracks_first_header_emit() {
        let tags = TagRegistry::new();
        let engine = EchoEngine;
        let eval = Evaluator::new(&tags, &engine);
        let mut frame = AdpFrame::new("page.adp");
        let mut flushes = Vec::new();
        let mut sink = |headers: bool, bytes: &[u8]| flushes.push((headers, bytes.to_vec()));
        let result = eval.run(
            r#"<script runat=server stream=on>noop</script>first"#,
            &mut frame,
            &mut sink,
        );
        assert_eq!(result, Exception::Ok);
        assert_eq!(flushes.len(), 1);
        assert!(flushes[0].0);
        assert_eq!(flushes[0].1, b"first");
    }

    #[test]
    fn registered_tag_body_reaches_engine() {
        let mut tags = TagRegistry::new();
        tags.register("box", TagKind::AdpTag, true);
        let engine = EchoEngine;
        let eval = Evaluator::new(&tags, &engine);
        let mut frame = AdpFrame::new("page.adp");
        let mut sink = |_headers: bool, _bytes: &[u8]| {};
        eval.run("<box>hi</box>", &mut frame, &mut sink);
        assert_eq!(frame.output_buffer, "<box:hi>");
    }
}
