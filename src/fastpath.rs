//! Fast-path file responder (spec.md §4.G): the default handler for
//! `GET/HEAD/POST /`. Grounded on this crate's predecessor's static-file serving in
//! `src/handlers/` (directory-index probing, `Last-Modified`/
//! `If-Modified-Since` handling), generalized to route through the shared
//! [`crate::cache::ContentCache`] instead of re-reading the file per
//! request.

use std::fs;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::adp::{AdpFrame, Evaluator, Exception, ScriptEngine, TagRegistry};
use crate::cache::ContentCache;
use crate::connection::RequestContext;
use crate::driver::ByteStream;
use crate::http::{date, Response};
use crate::mime;

pub struct FastPathConfig {
    pub page_root: PathBuf,
    pub directory_index: Vec<String>,
    pub cache_enabled: bool,
    pub autoindex: bool,
    /// When set, cold reads (cache miss or a file over the per-entry size
    /// limit) go through `mmap(2)` instead of `fs::read`, letting the page
    /// cache back the bytes instead of copying the whole file into an
    /// allocation up front.
    pub mmap: bool,
}

/// Resolves a URL to a filesystem path. The default is `pageroot + url`;
/// callers may substitute their own via [`FastPathResponder::with_resolver`]
/// (spec.md §4.G step 1, "replaceable `url-to-file` hook").
pub type UrlToFile = Arc<dyn Fn(&Path, &str) -> PathBuf + Send + Sync>;

/// Tag registry + script engine pair, wired in via
/// [`FastPathResponder::with_adp`] so `.adp` files are evaluated instead of
/// served as static bytes (spec.md §4.H/§4.G interaction).
struct AdpRuntime {
    tags: Arc<TagRegistry>,
    engine: Arc<dyn ScriptEngine>,
}

pub struct FastPathResponder {
    config: FastPathConfig,
    cache: Arc<ContentCache>,
    resolver: UrlToFile,
    adp: Option<AdpRuntime>,
}

fn default_resolver(root: &Path, url: &str) -> PathBuf {
    root.join(url.trim_start_matches('/'))
}

impl FastPathResponder {
    pub fn new(config: FastPathConfig, cache: Arc<ContentCache>) -> Self {
        Self { config, cache, resolver: Arc::new(default_resolver), adp: None }
    }

    pub fn with_resolver(mut self, resolver: UrlToFile) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_adp(mut self, tags: Arc<TagRegistry>, engine: Arc<dyn ScriptEngine>) -> Self {
        self.adp = Some(AdpRuntime { tags, engine });
        self
    }

    pub fn handle(&self, ctx: &mut RequestContext, stream: &mut dyn ByteStream) -> Response {
        let trimmed = ctx.url().trim_end_matches('/');
        let url = if trimmed.is_empty() { "/" } else { trimmed };
        let path = (self.resolver)(&self.config.page_root, url);

        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => return Response::plain_text(404, "Not Found"),
        };

        if metadata.is_file() {
            return self.serve_file(ctx, &path, &metadata, stream);
        }
        if metadata.is_dir() {
            return self.serve_directory(ctx, &path, ctx.url(), stream);
        }
        Response::plain_text(404, "Not Found")
    }

    fn serve_file(
        &self,
        ctx: &RequestContext,
        path: &Path,
        metadata: &fs::Metadata,
        stream: &mut dyn ByteStream,
    ) -> Response {
        let mtime = metadata.mtime();
        if let Some(ims) = ctx.request.header("if-modified-since") {
            if let Some(ims_epoch) = date::parse(ims) {
                if date::covers(ims_epoch, mtime) {
                    return Response::not_modified();
                }
            }
        }

        let content_type = mime::for_path(path);
        let last_modified = date::format(mtime);

        if ctx.method() == "HEAD" {
            return Response::new(200)
                .with_header("content-type", content_type)
                .with_header("last-modified", &last_modified)
                .with_header("content-length", metadata.len().to_string())
                .headers_only();
        }

        let size = metadata.len();
        let use_mmap = self.config.mmap;
        let bytes_result: Result<Vec<u8>, std::io::Error> =
            if !self.config.cache_enabled || (size as usize) > self.cache.per_entry_limit() {
                read_file(path, use_mmap)
            } else {
                let key = (metadata.dev(), metadata.ino());
                let path_owned = path.to_path_buf();
                match self.cache.get_or_load(key, mtime, size, move || {
                    read_file(&path_owned, use_mmap).map_err(crate::error::AdpError::Io)
                }) {
                    Ok(entry) => Ok(entry.bytes.clone()),
                    Err(crate::error::AdpError::Io(e)) => Err(e),
                    Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
                }
            };

        let bytes = match bytes_result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "fast-path read failed");
                return Response::plain_text(500, "Internal Server Error");
            }
        };

        if let Some(adp) = &self.adp {
            if path.extension().and_then(|e| e.to_str()) == Some("adp") {
                return self.evaluate_adp(adp, path, &bytes, stream);
            }
        }

        Response::new(200)
            .with_header("last-modified", &last_modified)
            .with_body(bytes, content_type)
    }

    /// Runs an `.adp` page's bytes through the evaluator instead of serving
    /// them verbatim (spec.md §4.H/§4.G interaction: "fast-path serving
    /// dispatches `.adp` files to the ADP core"). `OVERFLOW` maps to a 500;
    /// `ABORT` and a `stream=on` page both mean the page already wrote (or
    /// should write nothing further) and the caller must not layer its own
    /// response on top.
    fn evaluate_adp(
        &self,
        adp: &AdpRuntime,
        path: &Path,
        bytes: &[u8],
        stream: &mut dyn ByteStream,
    ) -> Response {
        let source = match std::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "adp page is not valid utf-8");
                return Response::plain_text(500, "Internal Server Error");
            }
        };
        let mut frame = AdpFrame::new(path.display().to_string());
        let evaluator = Evaluator::new(&adp.tags, adp.engine.as_ref());
        let content_type = format!("{}; charset={}", frame.mimetype, frame.charset);

        let mut streamed = false;
        let mut write_failed = false;
        let exception = {
            let mut sink = |headers_first: bool, chunk: &[u8]| {
                streamed = true;
                if write_failed {
                    return;
                }
                if headers_first {
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n"
                    );
                    if stream.write_all(head.as_bytes()).is_err() {
                        write_failed = true;
                        return;
                    }
                }
                if write_chunk(stream, chunk).is_err() {
                    write_failed = true;
                }
            };
            evaluator.run(source, &mut frame, &mut sink)
        };

        if streamed {
            if !write_failed {
                let _ = stream.write_all(b"0\r\n\r\n");
            }
            return Response::already_written();
        }

        match exception {
            Exception::Overflow => Response::plain_text(500, "Internal Server Error"),
            Exception::Abort => Response::already_written(),
            _ => Response::new(200).with_body(frame.output_buffer.into_bytes(), &content_type),
        }
    }

    fn serve_directory(
        &self,
        ctx: &RequestContext,
        dir: &Path,
        url: &str,
        stream: &mut dyn ByteStream,
    ) -> Response {
        for index_name in &self.config.directory_index {
            let candidate = dir.join(index_name);
            if candidate.is_file() {
                if !url.ends_with('/') {
                    return Response::redirect(301, &format!("{url}/"));
                }
                let metadata = match fs::metadata(&candidate) {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                return self.serve_file(ctx, &candidate, &metadata, stream);
            }
        }
        if self.config.autoindex {
            if !url.ends_with('/') {
                return Response::redirect(301, &format!("{url}/"));
            }
            return self.generate_autoindex(dir, url);
        }
        Response::plain_text(404, "Not Found")
    }

    /// Directory listing for when no index file is found and autoindex is
    /// enabled. Grounded on this crate's predecessor's `generate_autoindex`
    /// (`src/http/response.rs`).
    fn generate_autoindex(&self, dir: &Path, url: &str) -> Response {
        let mut html = format!("<html><body><h1>Index of {url}</h1><ul>");
        if let Ok(entries) = dir.read_dir() {
            let mut names: Vec<String> = entries
                .flatten()
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect();
            names.sort();
            for name in names {
                html.push_str(&format!(
                    "<li><a href=\"{}/{}\">{}</a></li>",
                    url.trim_end_matches('/'),
                    name,
                    name
                ));
            }
        }
        html.push_str("</ul></body></html>");
        Response::new(200).with_body(html.into_bytes(), "text/html")
    }
}

/// Writes one HTTP/1.1 chunked-encoding frame. Empty chunks are a no-op:
/// an empty chunk on the wire is the terminator, which the caller writes
/// itself once the page finishes.
fn write_chunk(stream: &mut dyn ByteStream, chunk: &[u8]) -> std::io::Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    stream.write_all(format!("{:x}\r\n", chunk.len()).as_bytes())?;
    stream.write_all(chunk)?;
    stream.write_all(b"\r\n")
}

/// Reads a file's bytes, via `mmap(2)` when `use_mmap` is set and `fs::read`
/// otherwise. An empty file can't be mapped (`Mmap::map` rejects a zero-length
/// mapping), so that case always falls back to a plain read.
fn read_file(path: &Path, use_mmap: bool) -> std::io::Result<Vec<u8>> {
    if !use_mmap {
        return fs::read(path);
    }
    let file = fs::File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }
    // SAFETY: the mapped file isn't expected to be truncated or modified by
    // another process while held; a racing writer can only ever produce a
    // torn read of this request's own response body, never unsound memory.
    let mapped = unsafe { memmap2::Mmap::map(&file)? };
    Ok(mapped.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RequestContext;
    use std::io;

    fn cache() -> Arc<ContentCache> {
        Arc::new(ContentCache::new(1024 * 1024, 1024 * 1024))
    }

    /// A stream that discards writes, for tests that don't exercise
    /// streaming ADP output.
    #[derive(Default)]
    struct NullStream;
    impl io::Read for NullStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }
    impl io::Write for NullStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    impl ByteStream for NullStream {
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn serves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::File::create(&file_path).unwrap().write_all(b"hello").unwrap();

        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: false,
                mmap: false,
            },
            cache(),
        );
        let mut ctx = RequestContext::for_test("GET", "/a.txt");
        let response = responder.handle(&mut ctx, &mut NullStream);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
    }

    #[test]
    fn read_file_via_mmap_matches_plain_read() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("mapped.txt");
        std::fs::File::create(&file_path).unwrap().write_all(b"mapped bytes").unwrap();

        assert_eq!(read_file(&file_path, false).unwrap(), b"mapped bytes");
        assert_eq!(read_file(&file_path, true).unwrap(), b"mapped bytes");
    }

    #[test]
    fn read_file_via_mmap_handles_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("empty.txt");
        std::fs::File::create(&file_path).unwrap();

        assert_eq!(read_file(&file_path, true).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn serves_existing_file_with_mmap_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::File::create(&file_path).unwrap().write_all(b"hello").unwrap();

        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: false,
                mmap: true,
            },
            cache(),
        );
        let mut ctx = RequestContext::for_test("GET", "/a.txt");
        let response = responder.handle(&mut ctx, &mut NullStream);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: false,
                mmap: false,
            },
            cache(),
        );
        let mut ctx = RequestContext::for_test("GET", "/nope.txt");
        assert_eq!(responder.handle(&mut ctx, &mut NullStream).status, 404);
    }

    #[test]
    fn directory_without_trailing_slash_redirects() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::File::create(dir.path().join("sub/index.html"))
            .unwrap()
            .write_all(b"hi")
            .unwrap();

        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: false,
                mmap: false,
            },
            cache(),
        );
        let mut ctx = RequestContext::for_test("GET", "/sub");
        let response = responder.handle(&mut ctx, &mut NullStream);
        assert_eq!(response.status, 301);
        assert_eq!(response.headers.get("location").map(String::as_str), Some("/sub/"));
    }

    #[test]
    fn head_request_omits_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.txt")).unwrap().write_all(b"hello").unwrap();
        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: false,
                mmap: false,
            },
            cache(),
        );
        let mut ctx = RequestContext::for_test("HEAD", "/a.txt");
        let response = responder.handle(&mut ctx, &mut NullStream);
        assert!(response.body.is_empty());
        assert_eq!(response.headers.get("content-length").map(String::as_str), Some("5"));
    }

    #[test]
    fn directory_without_index_lists_entries_when_autoindex_enabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::File::create(dir.path().join("sub/a.txt")).unwrap().write_all(b"x").unwrap();

        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: true,
                mmap: false,
            },
            cache(),
        );
        let mut ctx = RequestContext::for_test("GET", "/sub/");
        let response = responder.handle(&mut ctx, &mut NullStream);
        assert_eq!(response.status, 200);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("Index of /sub/"));
        assert!(body.contains("href=\"/sub/a.txt\""));
    }

    #[test]
    fn directory_without_index_is_404_when_autoindex_disabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: false,
                mmap: false,
            },
            cache(),
        );
        let mut ctx = RequestContext::for_test("GET", "/sub/");
        assert_eq!(responder.handle(&mut ctx, &mut NullStream).status, 404);
    }

    #[test]
    fn adp_file_is_evaluated_not_served_verbatim() {
        use crate::adp::{BasicEngine, TagRegistry};

        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("page.adp"))
            .unwrap()
            .write_all(b"hello <%= set name \"world\"; $name %>!")
            .unwrap();

        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: false,
                mmap: false,
            },
            cache(),
        )
        .with_adp(Arc::new(TagRegistry::new()), Arc::new(BasicEngine));

        let mut ctx = RequestContext::for_test("GET", "/page.adp");
        let response = responder.handle(&mut ctx, &mut NullStream);
        assert_eq!(response.status, 200);
        assert_eq!(String::from_utf8(response.body).unwrap(), "hello world!");
        assert!(response.headers.get("content-type").unwrap().starts_with("text/html"));
    }

    /// A stream that records everything written to it, for asserting on
    /// the bytes an ADP `stream=on` page actually put on the wire.
    #[derive(Default)]
    struct RecordingStream(Vec<u8>);
    impl io::Read for RecordingStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }
    impl io::Write for RecordingStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    impl ByteStream for RecordingStream {
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn streaming_adp_page_writes_chunked_bytes_to_the_connection() {
        use crate::adp::{BasicEngine, TagRegistry};

        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("page.adp"))
            .unwrap()
            .write_all(b"<script runat=server stream=on>noop</script>hello")
            .unwrap();

        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: false,
                mmap: false,
            },
            cache(),
        )
        .with_adp(Arc::new(TagRegistry::new()), Arc::new(BasicEngine));

        let mut ctx = RequestContext::for_test("GET", "/page.adp");
        let mut stream = RecordingStream::default();
        let response = responder.handle(&mut ctx, &mut stream);

        assert!(response.already_written);
        let written = String::from_utf8(stream.0).unwrap();
        assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(written.contains("Transfer-Encoding: chunked\r\n"));
        assert!(written.contains("hello"));
        assert!(written.ends_with("0\r\n\r\n"));
    }

    #[test]
    fn adp_abort_suppresses_the_default_response() {
        use crate::adp::{BasicEngine, TagRegistry};

        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("page.adp"))
            .unwrap()
            .write_all(b"before<%= abort %>after")
            .unwrap();

        let responder = FastPathResponder::new(
            FastPathConfig {
                page_root: dir.path().to_path_buf(),
                directory_index: vec!["index.html".to_string()],
                cache_enabled: true,
                autoindex: false,
                mmap: false,
            },
            cache(),
        )
        .with_adp(Arc::new(TagRegistry::new()), Arc::new(BasicEngine));

        let mut ctx = RequestContext::for_test("GET", "/page.adp");
        let response = responder.handle(&mut ctx, &mut NullStream);
        assert!(response.already_written);
        assert!(response.body.is_empty());
    }
}
