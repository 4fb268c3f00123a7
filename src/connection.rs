//! Request lifecycle glue (spec.md §4.I): the per-connection driver that
//! parses a request off a [`crate::driver::ByteStream`], runs it through
//! admission control, the filter pipeline, handler dispatch, and cleanup.
//! Grounded on this crate's predecessor's per-connection handling loop in
//! `src/http/http_connection.rs`, generalized from a fixed router to the
//! capability-driven pieces built elsewhere in this crate (limits, filters,
//! fastpath).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{info, warn};
use wildmatch::WildMatch;

use crate::config::ServerConfig;
use crate::driver::ByteStream;
use crate::filters::{FilterStatus, Pipeline, When};
use crate::http::{Method, ParseError, Request, RequestParser, Response};
use crate::limits::LimitsRegistry;

/// Per-request scratch state visible to filters, traces, and cleanups.
/// Exclusive to the worker handling the connection (spec.md §3
/// "Connection": exclusive ownership by the worker during handling).
pub struct RequestContext {
    pub request: Request,
    pub server_name: String,
    pub response_status: u16,
    pub keepalive: bool,
    pub skip_body: bool,
    vars: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(request: Request, server_name: impl Into<String>) -> Self {
        let keepalive = request.keepalive_requested();
        Self {
            request,
            server_name: server_name.into(),
            response_status: 200,
            keepalive,
            skip_body: false,
            vars: HashMap::new(),
        }
    }

    pub fn method(&self) -> &str {
        match &self.request.method {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Other(s) => s.as_str(),
        }
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Builds a minimal context for tests that only exercise method/URL
    /// matching (filters, handler dispatch) without a real wire request.
    pub fn for_test(method: &str, url: &str) -> Self {
        let mut request = Request::default();
        request.method = method.parse().unwrap_or(Method::Get);
        request.url = url.to_string();
        Self::new(request, "test")
    }
}

/// `stream` gives a handler write access to the live connection so it can
/// stream a response as it's produced (ADP `stream=on` pages) instead of
/// only returning a fully-buffered [`Response`]; a handler that writes
/// directly must return [`Response::already_written`].
pub type Handler = Arc<dyn Fn(&mut RequestContext, &mut dyn ByteStream) -> Response + Send + Sync>;

struct Route {
    method: WildMatch,
    url: WildMatch,
    handler: Handler,
}

/// URL-space handler registry (spec.md §4.I step 5): `(method, URL-prefix)
/// -> handler`, falling back to the fast-path responder.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: Vec<Route>,
    default: Option<Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method_pattern: &str, url_pattern: &str, handler: Handler) {
        self.routes.push(Route {
            method: WildMatch::new(method_pattern),
            url: WildMatch::new(url_pattern),
            handler,
        });
    }

    pub fn set_default(&mut self, handler: Handler) {
        self.default = Some(handler);
    }

    /// Most-specific registered route wins; falls back to the default
    /// fast-path responder when nothing matches.
    fn resolve(&self, method: &str, url: &str) -> Option<&Handler> {
        self.routes
            .iter()
            .filter(|r| r.method.matches(method) && r.url.matches(url))
            .max_by_key(|r| r.url.to_string().len())
            .map(|r| &r.handler)
            .or(self.default.as_ref())
    }
}

/// Everything a worker needs to run the seven-step lifecycle of spec.md
/// §4.I for one connection.
pub struct ConnectionHandler {
    pub limits: Arc<LimitsRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub handlers: Arc<HandlerRegistry>,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl ConnectionHandler {
    /// Handles one TCP connection end-to-end, including HTTP keep-alive
    /// (re-parsing subsequent requests on the same stream).
    pub fn handle(&self, mut stream: Box<dyn ByteStream>) {
        let peer = stream.peer_addr().unwrap_or_else(|| "unknown".to_string());
        loop {
            let mut parser = RequestParser::new(self.max_header_bytes, self.max_body_bytes);
            match self.read_request(&mut *stream, &mut parser) {
                Ok(Some(request)) => {
                    let keepalive = self.dispatch_one(request, &mut *stream, &peer);
                    if !keepalive {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(%peer, error = %e, "malformed request, closing connection");
                    let response = Response::plain_text(400, "Bad Request");
                    let _ = stream.write_all(&response.to_bytes("HTTP/1.1"));
                    break;
                }
            }
        }
        let _ = stream.close();
    }

    /// Drives the parser against the stream until a full request is
    /// available, the peer closes the connection, or a malformed request is
    /// detected. `Incomplete` is not an error here: it just means more bytes
    /// are needed from the stream.
    fn read_request(
        &self,
        stream: &mut dyn ByteStream,
        parser: &mut RequestParser,
    ) -> Result<Option<Request>, ParseError> {
        let mut buf = [0u8; 8192];
        loop {
            match parser.advance() {
                Ok(true) => {
                    let request = parser.request.clone();
                    parser.reset_for_next_request();
                    return Ok(Some(request));
                }
                Ok(false) | Err(ParseError::Incomplete) => {}
                Err(e) => return Err(e),
            }
            let n = match stream.read(&mut buf) {
                Ok(n) => n,
                Err(_) => return Ok(None),
            };
            if n == 0 {
                return Ok(None);
            }
            parser.feed(&buf[..n]);
        }
    }

    /// Runs the seven-step lifecycle from spec.md §4.I for one parsed
    /// request. Returns whether the connection should stay open.
    fn dispatch_one(&self, request: Request, stream: &mut dyn ByteStream, peer: &str) -> bool {
        let server_name = request.host.clone().unwrap_or_else(|| "default".to_string());
        let mut ctx = RequestContext::new(request, server_name.clone());

        // Step 2: admission.
        let limits = self
            .limits
            .resolve(&server_name, ctx.method(), ctx.url());
        if let Some(len) = ctx.request.content_length() {
            if limits.reject_upload(len) {
                warn!(%peer, "upload exceeds maxupload, rejecting");
                // Admission failure (spec.md §4.I): 503 with `ndropped`
                // bumped by `reject_upload`, not a 413 — the client didn't
                // do anything wrong, the server just won't admit it now.
                self.respond(stream, Response::plain_text(503, "Service Unavailable"), &ctx);
                return false;
            }
        }
        let guard = match limits.admit() {
            Ok(guard) => guard,
            Err(e) => {
                info!(%peer, error = %e, "admission rejected");
                self.respond(stream, Response::plain_text(503, "Service Unavailable"), &ctx);
                return false;
            }
        };

        // Step 3: pre-auth filters.
        let keepalive = if self.pipeline.run_filters(&mut ctx, When::PRE_AUTH) == FilterStatus::Error {
            self.respond(stream, Response::plain_text(500, "Internal Server Error"), &ctx);
            false
        } else {
            // Step 4: authenticate (opaque; this crate has no identity
            // provider of its own, so post-auth filters run unconditionally)
            // then post-auth filters.
            if self.pipeline.run_filters(&mut ctx, When::POST_AUTH) == FilterStatus::Error {
                self.respond(stream, Response::plain_text(500, "Internal Server Error"), &ctx);
                false
            } else {
                // Step 5 + 6: resolve and invoke handler.
                let response = match self.handlers.resolve(ctx.method(), ctx.url()) {
                    Some(handler) => {
                        let response = handler(&mut ctx, stream);
                        self.pipeline.run_traces(&ctx);
                        self.pipeline.run_filters(&mut ctx, When::TRACE);
                        response
                    }
                    None => Response::plain_text(404, "Not Found"),
                };
                // A handler that streamed its own response already closed
                // out the wire format on its own terms; don't layer the
                // normal buffered write on top, and don't keep the
                // connection alive for a framing this path doesn't track.
                let keepalive = !response.already_written && ctx.keepalive && response.status < 500;
                self.respond(stream, response, &ctx);
                keepalive
            }
        };

        // Step 7: cleanups always run, regardless of outcome, before
        // releasing the admission guard.
        self.pipeline.run_cleanups(&ctx);
        drop(guard);
        keepalive
    }

    fn respond(&self, stream: &mut dyn ByteStream, mut response: Response, ctx: &RequestContext) {
        if response.already_written {
            return;
        }
        if ctx.method() == "HEAD" || ctx.skip_body {
            response = response.headers_only();
        }
        let version = if ctx.request.version >= 1.0 { ctx.request.version } else { 1.1 };
        let version_str = format!("HTTP/{:.1}", version);
        if let Err(e) = stream.write_all(&response.to_bytes(&version_str)) {
            warn!(error = %e, "failed writing response");
        }
    }
}

/// Binds a server's configured routes into a [`HandlerRegistry`], wiring the
/// fast-path responder in as the default. Route-to-handler construction is
/// intentionally shallow here; `fastpath` owns the filesystem algorithm.
pub fn build_handlers(server: &ServerConfig, fastpath: Handler) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.set_default(fastpath);
    for route in &server.routes {
        if let Some(code) = route.redirect_code {
            if let Some(target) = route.redirection.clone() {
                let handler: Handler = Arc::new(move |_ctx, _stream| Response::redirect(code, &target));
                for method in &route.methods {
                    registry.register(method, &format!("{}*", route.path), Arc::clone(&handler));
                }
            }
        }
    }
    registry
}
