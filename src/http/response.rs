use std::collections::HashMap;

/// Outgoing response. Grounded on this crate's predecessor's `HttpResponse`
/// (`src/http/response.rs`) — same pascal-cased header serialization — with
/// the MIME/error-page lookups it inlined moved out to `crate::mime` and
/// `crate::fastpath` so this module stays pure wire formatting.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Set when a handler already wrote its response straight to the
    /// connection (ADP `stream=on` pages flush chunks as they're produced)
    /// so `ConnectionHandler::respond` must not write anything on top of it.
    pub already_written: bool,
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            already_written: false,
        }
    }

    /// Placeholder returned by a handler that already wrote its response
    /// directly to the connection (see [`Response::already_written`]).
    pub fn already_written() -> Self {
        let mut resp = Self::new(200);
        resp.already_written = true;
        resp
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.headers.insert("content-type".into(), content_type.into());
        self.headers.insert("content-length".into(), body.len().to_string());
        self.body = body;
        self
    }

    pub fn plain_text(status: u16, text: impl Into<String>) -> Self {
        Self::new(status).with_body(text.into().into_bytes(), "text/plain")
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status)
            .with_header("location", location)
            .with_header("content-length", "0")
    }

    pub fn not_modified() -> Self {
        Self::new(304).with_header("content-length", "0")
    }

    /// Strips the body for `HEAD` responses while leaving `Content-Length`
    /// as computed, per spec.md §6 "`HEAD` responses omit the body."
    pub fn headers_only(mut self) -> Self {
        self.body.clear();
        self
    }

    pub fn to_bytes(&self, version: &str) -> Vec<u8> {
        let mut out = format!("{version} {} {}\r\n", self.status, self.reason).into_bytes();
        for (key, value) in &self.headers {
            out.extend_from_slice(format!("{}: {value}\r\n", to_header_case(key)).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

fn to_header_case(s: &str) -> String {
    s.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_ascii_uppercase().to_string() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_status_line_and_headers() {
        let resp = Response::new(200).with_header("content-type", "text/plain");
        let bytes = resp.to_bytes("HTTP/1.1");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn head_response_drops_body_but_keeps_length_header() {
        let resp = Response::new(200).with_body(b"hello".to_vec(), "text/plain").headers_only();
        assert!(resp.body.is_empty());
        assert_eq!(resp.headers.get("content-length").map(String::as_str), Some("5"));
    }
}
