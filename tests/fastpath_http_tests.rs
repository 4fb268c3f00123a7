//! End-to-end test of a real file served over a TCP connection through the
//! whole stack: driver's `ByteStream` -> `ConnectionHandler` -> fast-path
//! responder -> content cache. Grounded on the same shape as
//! `connection_tests.rs`, exercising the fast-path default route instead of
//! a registered handler.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use adp_server::cache::ContentCache;
use adp_server::config::LimitsDef;
use adp_server::connection::{build_handlers, ConnectionHandler};
use adp_server::config::ServerConfig;
use adp_server::fastpath::{FastPathConfig, FastPathResponder};
use adp_server::filters::Pipeline;
use adp_server::limits::LimitsRegistry;

#[test]
fn serves_static_file_through_full_stack() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"<h1>hi</h1>").unwrap();

    let mut defs = HashMap::new();
    defs.insert("default".to_string(), LimitsDef::default());
    let limits = Arc::new(LimitsRegistry::new(&defs));
    let pipeline = Arc::new(Pipeline::new());
    let cache = Arc::new(ContentCache::new(1024 * 1024, 1024 * 1024));

    let server_config = ServerConfig {
        root: dir.path().to_string_lossy().into_owned(),
        ..ServerConfig::default()
    };

    let fastpath = Arc::new(FastPathResponder::new(
        FastPathConfig {
            page_root: dir.path().to_path_buf(),
            directory_index: server_config.directory_index.clone(),
            cache_enabled: true,
            autoindex: server_config.autoindex,
            mmap: false,
        },
        cache,
    ));
    let fastpath_handler: adp_server::connection::Handler = {
        let fastpath = Arc::clone(&fastpath);
        Arc::new(move |ctx, stream| fastpath.handle(ctx, stream))
    };
    let handlers = Arc::new(build_handlers(&server_config, fastpath_handler));

    let handler = Arc::new(ConnectionHandler {
        limits,
        pipeline,
        handlers,
        max_header_bytes: 8192,
        max_body_bytes: 1024 * 1024,
    });

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        handler.handle(Box::new(stream));
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    client.shutdown(std::net::Shutdown::Write).ok();

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    server.join().unwrap();

    let text = String::from_utf8_lossy(&buf);
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.ends_with("<h1>hi</h1>"));
}
