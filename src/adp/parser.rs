//! ADP block-stream parser (spec.md §4.H "Parser"). Three parsing passes
//! blend in a single left-to-right scan: inline `<% %>`/`<%= %>` regions
//! take precedence; between them the scanner looks for `<script runat=server
//! ...>` and registered-tag invocations.

use std::collections::HashMap;

use crate::adp::tags::{TagKind, TagRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(String),
    /// `append_result` marks a `<%= ... %>` block: the evaluator wraps the
    /// source in an "append to output buffer" call.
    Script { source: String, append_result: bool },
    /// Synthesized when streaming is turned on implicitly by a
    /// `<script runat=server stream=on>` tag that hasn't streamed yet.
    EnableStreaming,
    TagInvoke {
        name: String,
        kind: TagKind,
        attrs: HashMap<String, String>,
        body: Option<String>,
    },
}

/// Length header accompanying the block sequence: positive for text-block
/// length, negative for script-block length (spec.md §4.H). Tag invocations
/// and the streaming marker have no natural byte length and are reported as
/// zero, matching their synthesized, zero-width nature in the source text.
pub fn length_header(blocks: &[Block]) -> Vec<i64> {
    blocks
        .iter()
        .map(|b| match b {
            Block::Text(s) => s.len() as i64,
            Block::Script { source, .. } => -(source.len() as i64),
            Block::EnableStreaming | Block::TagInvoke { .. } => 0,
        })
        .collect()
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
    tags: &'a TagRegistry,
    emitted_enable_streaming: bool,
}

pub fn parse(input: &str, tags: &TagRegistry) -> Vec<Block> {
    let mut scanner = Scanner { input, pos: 0, tags, emitted_enable_streaming: false };
    scanner.run()
}

impl<'a> Scanner<'a> {
    fn run(&mut self) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut text_start = self.pos;

        while self.pos < self.input.len() {
            if let Some(rel) = self.input[self.pos..].find("<%") {
                let abs = self.pos + rel;
                self.flush_between(&mut blocks, text_start, abs);
                self.pos = abs;
                self.parse_inline(&mut blocks);
                text_start = self.pos;
                continue;
            }

            if let Some(rel) = self.input[self.pos..].find('<') {
                let abs = self.pos + rel;
                // Only break out of plain text if this is a tag we actually
                // understand (script/registered); otherwise it's literal
                // markup and stays in the text run.
                if self.looks_like_script_tag(abs) || self.looks_like_registered_tag(abs) {
                    self.flush_between(&mut blocks, text_start, abs);
                    self.pos = abs;
                    if self.looks_like_script_tag(abs) {
                        self.parse_script_tag(&mut blocks);
                    } else {
                        self.parse_registered_tag(&mut blocks);
                    }
                    text_start = self.pos;
                    continue;
                }
            }
            break;
        }

        self.flush_between(&mut blocks, text_start, self.input.len());
        blocks
    }

    fn flush_between(&self, blocks: &mut Vec<Block>, start: usize, end: usize) {
        if end > start {
            blocks.push(Block::Text(self.input[start..end].to_string()));
        }
    }

    /// `<% ... %>` or `<%= ... %>`.
    fn parse_inline(&mut self, blocks: &mut Vec<Block>) {
        let append_result = self.input[self.pos..].starts_with("<%=");
        let skip = if append_result { 3 } else { 2 };
        let body_start = self.pos + skip;
        let close = self.input[body_start..].find("%>").map(|r| body_start + r).unwrap_or(self.input.len());
        let source = self.input[body_start..close].to_string();
        blocks.push(Block::Script { source, append_result });
        self.pos = if close < self.input.len() { close + 2 } else { close };
    }

    fn looks_like_script_tag(&self, at: usize) -> bool {
        self.input[at..].to_ascii_lowercase().starts_with("<script")
    }

    fn looks_like_registered_tag(&self, at: usize) -> bool {
        let rest = &self.input[at + 1..];
        let name: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_').collect();
        !name.is_empty() && self.tags.get(&name.to_ascii_lowercase()).is_some()
    }

    /// `<script runat=server language=tcl [stream=on]>...</script>`. A
    /// `<script>` tag without `runat=server` (or with a `language` other
    /// than the embedded one) is left verbatim in the text stream — spec.md
    /// §4.H: "Language other than the embedded one disables the server-side
    /// treatment."
    fn parse_script_tag(&mut self, blocks: &mut Vec<Block>) {
        let tag_start = self.pos;
        let Some(tag_end) = self.input[self.pos..].find('>').map(|r| self.pos + r) else {
            self.pos = self.input.len();
            return;
        };
        let attrs = parse_attrs(&self.input[self.pos + "<script".len()..tag_end]);
        let runat_server = attrs.get("runat").map(|v| v.eq_ignore_ascii_case("server")).unwrap_or(false);
        let embedded_language = attrs.get("language").map(|v| v.eq_ignore_ascii_case("tcl")).unwrap_or(true);
        let stream_on = attrs.get("stream").map(|v| v.eq_ignore_ascii_case("on")).unwrap_or(false);

        let body_start = tag_end + 1;
        let close_tag = "</script>";
        let body_end = self.input[body_start..]
            .to_ascii_lowercase()
            .find(close_tag)
            .map(|r| body_start + r)
            .unwrap_or(self.input.len());
        let source = self.input[body_start..body_end].to_string();
        self.pos = (body_end + close_tag.len()).min(self.input.len());

        if !runat_server || !embedded_language {
            blocks.push(Block::Text(self.input[tag_start..self.pos].to_string()));
            return;
        }

        if stream_on && !self.emitted_enable_streaming {
            blocks.push(Block::EnableStreaming);
            self.emitted_enable_streaming = true;
        }
        blocks.push(Block::Script { source, append_result: false });
    }

    fn parse_registered_tag(&mut self, blocks: &mut Vec<Block>) {
        let Some(tag_end) = self.input[self.pos..].find('>').map(|r| self.pos + r) else {
            self.pos = self.input.len();
            return;
        };
        let header = &self.input[self.pos + 1..tag_end];
        let name_len = header.chars().take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_').count();
        let name = header[..name_len].to_ascii_lowercase();
        let attrs = parse_attrs(&header[name_len..]);

        let Some(def) = self.tags.get(&name) else {
            self.pos = tag_end + 1;
            return;
        };

        let after_open = tag_end + 1;
        let body = if def.has_end_tag() {
            let end_marker = format!("</{name}>");
            let mut depth = 1usize;
            let mut scan_from = after_open;
            loop {
                let lower = self.input[scan_from..].to_ascii_lowercase();
                let next_close = lower.find(&end_marker);
                let next_open = lower.find(&format!("<{name}"));
                match (next_close, next_open) {
                    (Some(c), Some(o)) if o < c => {
                        depth += 1;
                        scan_from += o + 1;
                    }
                    (Some(c), _) => {
                        depth -= 1;
                        if depth == 0 {
                            let body_text = self.input[after_open..scan_from + c].to_string();
                            self.pos = scan_from + c + end_marker.len();
                            break Some(body_text);
                        }
                        scan_from += c + end_marker.len();
                    }
                    _ => {
                        self.pos = self.input.len();
                        break Some(self.input[after_open..].to_string());
                    }
                }
            }
        } else {
            self.pos = after_open;
            None
        };

        blocks.push(Block::TagInvoke { name, kind: def.kind, attrs, body });
    }
}

/// Tolerates quoted/unquoted values and spaces around `=` per spec.md §4.H.
fn parse_attrs(raw: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut chars = raw.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        let name_start = i;
        let mut name_end = raw.len();
        while let Some(&(j, c2)) = chars.peek() {
            if c2.is_whitespace() || c2 == '=' {
                name_end = j;
                break;
            }
            chars.next();
        }
        let name = raw[name_start..name_end].trim().to_string();
        if name.is_empty() {
            continue;
        }

        while let Some(&(_, c2)) = chars.peek() {
            if c2.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }

        let mut value = String::new();
        if let Some(&(_, '=')) = chars.peek() {
            chars.next();
            while let Some(&(_, c2)) = chars.peek() {
                if c2.is_whitespace() {
                    chars.next();
                } else {
                    break;
                }
            }
            if let Some(&(qi, q)) = chars.peek() {
                if q == '"' || q == '\'' {
                    chars.next();
                    let value_start = qi + 1;
                    let mut value_end = raw.len();
                    for (k, c3) in raw[value_start..].char_indices() {
                        if c3 == q {
                            value_end = value_start + k;
                            break;
                        }
                    }
                    value = raw[value_start..value_end].to_string();
                    while let Some(&(j, _)) = chars.peek() {
                        if j < value_end + 1 {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                } else {
                    let value_start = qi;
                    let mut value_end = raw.len();
                    while let Some(&(j, c3)) = chars.peek() {
                        if c3.is_whitespace() {
                            value_end = j;
                            break;
                        }
                        chars.next();
                    }
                    value = raw[value_start..value_end].to_string();
                }
            }
        }
        attrs.insert(name.to_ascii_lowercase(), value);
    }
    attrs
}
