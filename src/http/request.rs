use std::collections::HashMap;
use std::fmt;

use super::url;

/// Request methods the core dispatches on (spec.md §4.G only names
/// GET/HEAD/POST for the fast-path responder; everything else still needs to
/// parse so filters/handlers can see it). Grounded on this crate's predecessor's
/// `Method` enum (`src/http/request.rs`), widened with `Other` instead of
/// rejecting unknown verbs outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Other(s) => s.as_str(),
        }
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            other => Method::Other(other.to_string()),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParsingState {
    RequestLine,
    Headers,
    Body,
    ChunkedSize,
    ChunkedData(usize),
    ChunkedCrlf,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    Incomplete,
    MalformedRequestLine,
    InvalidHeaderLine,
    PayloadTooLarge,
    InvalidChunkSize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Incomplete => write!(f, "incomplete request"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::InvalidHeaderLine => write!(f, "invalid header line"),
            ParseError::PayloadTooLarge => write!(f, "payload too large"),
            ParseError::InvalidChunkSize => write!(f, "invalid chunk size"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parsed request line plus headers and body, per the data model in
/// spec.md §3: `url` is normalized absolute form, `urlv` is its decoded
/// `/`-split segments, `version` is 0.0 when the request line carried none.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub urlv: Vec<String>,
    pub query: String,
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub version: f32,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::Get,
            url: String::new(),
            urlv: Vec::new(),
            query: String::new(),
            protocol: None,
            host: None,
            port: None,
            version: 0.0,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    pub fn keepalive_requested(&self) -> bool {
        match self.header("connection").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v.contains("close") => false,
            Some(v) if v.contains("keep-alive") => true,
            _ => self.version >= 1.1,
        }
    }
}

/// Incremental byte-buffer parser. Grounded on this crate's predecessor's cursor-based
/// `HttpRequest` state machine (`src/http/request.rs`), stripped of the
/// CGI/multipart-upload coupling that spec.md §1 excludes from the core.
#[derive(Debug)]
pub struct RequestParser {
    pub buffer: Vec<u8>,
    pub cursor: usize,
    pub state: ParsingState,
    pub request: Request,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(8192, 1024 * 1024)
    }
}

impl RequestParser {
    pub fn new(max_header_bytes: usize, max_body_bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            cursor: 0,
            state: ParsingState::RequestLine,
            request: Request::default(),
            max_header_bytes,
            max_body_bytes,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Resets parser state for the next request on a keepalive connection,
    /// preserving any already-buffered pipelined bytes.
    pub fn reset_for_next_request(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
        self.state = ParsingState::RequestLine;
        self.request = Request::default();
    }

    /// Drives the state machine as far as the buffered bytes allow. Returns
    /// `Ok(true)` once a full request (line+headers+body) is available,
    /// `Ok(false)` if more bytes are needed, or an error for malformed input.
    pub fn advance(&mut self) -> Result<bool, ParseError> {
        loop {
            match self.state {
                ParsingState::RequestLine => self.parse_request_line()?,
                ParsingState::Headers => self.parse_headers()?,
                ParsingState::Body => {
                    if !self.parse_body()? {
                        return Ok(false);
                    }
                }
                ParsingState::ChunkedSize | ParsingState::ChunkedData(_) | ParsingState::ChunkedCrlf => {
                    if !self.parse_chunked()? {
                        return Ok(false);
                    }
                }
                ParsingState::Complete => return Ok(true),
            }
        }
    }

    fn find_crlf(&self) -> Option<usize> {
        let mut i = self.cursor;
        while i + 1 < self.buffer.len() {
            if self.buffer[i] == b'\r' && self.buffer[i + 1] == b'\n' {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    fn parse_request_line(&mut self) -> Result<(), ParseError> {
        let Some(end) = self.find_crlf() else {
            if self.buffer.len() - self.cursor > self.max_header_bytes {
                return Err(ParseError::MalformedRequestLine);
            }
            return Err(ParseError::Incomplete);
        };
        let line = std::str::from_utf8(&self.buffer[self.cursor..end])
            .map_err(|_| ParseError::MalformedRequestLine)?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(ParseError::MalformedRequestLine);
        }

        self.request.method = parts[0].parse().unwrap();

        let raw_url = parts[1];
        let (path, query) = match raw_url.split_once('?') {
            Some((p, q)) => (p, q),
            None => (raw_url, ""),
        };
        let normalized = url::normalize(&url::decode(path, false));
        self.request.urlv = url::segments(&normalized).into_iter().map(String::from).collect();
        self.request.url = normalized;
        self.request.query = query.to_string();

        self.request.version = if parts.len() == 3 {
            parts[2]
                .strip_prefix("HTTP/")
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(0.0)
        } else {
            0.0
        };

        self.cursor = end + 2;
        self.state = ParsingState::Headers;
        Ok(())
    }

    fn parse_headers(&mut self) -> Result<(), ParseError> {
        loop {
            let Some(end) = self.find_crlf() else {
                if self.buffer.len() - self.cursor > self.max_header_bytes {
                    return Err(ParseError::InvalidHeaderLine);
                }
                return Err(ParseError::Incomplete);
            };
            if end == self.cursor {
                self.cursor = end + 2;
                self.buffer.drain(..self.cursor);
                self.cursor = 0;
                self.populate_host_from_headers();
                self.state = self.body_transition_state()?;
                return Ok(());
            }
            let line = std::str::from_utf8(&self.buffer[self.cursor..end])
                .map_err(|_| ParseError::InvalidHeaderLine)?;
            let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeaderLine)?;
            self.request
                .headers
                .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            self.cursor = end + 2;
        }
    }

    /// Fills `host`/`port`/`protocol` from the `Host` header (spec.md §4.I
    /// virtual hosting: dispatch keys off these, not the bare header
    /// lookup). No TLS driver exists yet, so `protocol` is always `http`.
    fn populate_host_from_headers(&mut self) {
        self.request.protocol = Some("http".to_string());
        let Some(raw_host) = self.request.header("host") else {
            return;
        };
        let raw_host = raw_host.to_string();
        match raw_host.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                self.request.host = Some(host.to_string());
                self.request.port = port.parse().ok();
            }
            _ => {
                self.request.host = Some(raw_host);
            }
        }
    }

    fn body_transition_state(&mut self) -> Result<ParsingState, ParseError> {
        if self.request.is_chunked() {
            return Ok(ParsingState::ChunkedSize);
        }
        let content_length = self.request.content_length().unwrap_or(0);
        if content_length > self.max_body_bytes {
            return Err(ParseError::PayloadTooLarge);
        }
        if content_length == 0 {
            return Ok(ParsingState::Complete);
        }
        Ok(ParsingState::Body)
    }

    fn parse_body(&mut self) -> Result<bool, ParseError> {
        let want = self.request.content_length().unwrap_or(0);
        let have = self.buffer.len() - self.cursor;
        if have < want {
            return Ok(false);
        }
        self.request.body = self.buffer[self.cursor..self.cursor + want].to_vec();
        self.cursor += want;
        self.state = ParsingState::Complete;
        Ok(true)
    }

    fn parse_chunked(&mut self) -> Result<bool, ParseError> {
        loop {
            match self.state {
                ParsingState::ChunkedSize => {
                    let Some(end) = self.find_crlf() else { return Ok(false) };
                    let line = std::str::from_utf8(&self.buffer[self.cursor..end])
                        .map_err(|_| ParseError::InvalidChunkSize)?;
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunkSize)?;
                    if self.request.body.len() + size > self.max_body_bytes {
                        return Err(ParseError::PayloadTooLarge);
                    }
                    self.cursor = end + 2;
                    self.state = if size == 0 {
                        ParsingState::Complete
                    } else {
                        ParsingState::ChunkedData(size)
                    };
                    if self.state == ParsingState::Complete {
                        self.buffer.drain(..self.cursor);
                        self.cursor = 0;
                        return Ok(true);
                    }
                }
                ParsingState::ChunkedData(remaining) => {
                    let have = self.buffer.len() - self.cursor;
                    if have < remaining {
                        return Ok(false);
                    }
                    self.request
                        .body
                        .extend_from_slice(&self.buffer[self.cursor..self.cursor + remaining]);
                    self.cursor += remaining;
                    self.state = ParsingState::ChunkedCrlf;
                }
                ParsingState::ChunkedCrlf => {
                    if self.buffer.len() - self.cursor < 2 {
                        return Ok(false);
                    }
                    self.cursor += 2;
                    self.state = ParsingState::ChunkedSize;
                }
                _ => unreachable!("parse_chunked called outside chunked states"),
            }
        }
    }
}
