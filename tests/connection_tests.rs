//! Black-box tests for one connection's request lifecycle: a real
//! `TcpListener`/`TcpStream` pair driving `ConnectionHandler::handle` end to
//! end, exercising the whole dispatch path (admission, filters, handler
//! resolution, keep-alive).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use adp_server::config::LimitsDef;
use adp_server::connection::{ConnectionHandler, HandlerRegistry};
use adp_server::filters::Pipeline;
use adp_server::http::Response;
use adp_server::limits::LimitsRegistry;

fn handler() -> Arc<ConnectionHandler> {
    let mut defs = HashMap::new();
    defs.insert("default".to_string(), LimitsDef::default());
    let limits = Arc::new(LimitsRegistry::new(&defs));
    let pipeline = Arc::new(Pipeline::new());

    let mut handlers = HandlerRegistry::new();
    handlers.set_default(Arc::new(|_ctx, _stream| Response::plain_text(404, "no route")));
    handlers.register(
        "GET",
        "/hello",
        Arc::new(|_ctx, _stream| Response::new(200).with_body(b"hi".to_vec(), "text/plain")),
    );

    Arc::new(ConnectionHandler {
        limits,
        pipeline,
        handlers: Arc::new(handlers),
        max_header_bytes: 8192,
        max_body_bytes: 1024 * 1024,
    })
}

fn serve_one(handler: Arc<ConnectionHandler>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        handler.handle(Box::new(stream));
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    client.shutdown(std::net::Shutdown::Write).ok();

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    server.join().unwrap();

    let text = String::from_utf8_lossy(&buf);
    let status_line = text.lines().next().unwrap();
    status_line.split_whitespace().nth(1).unwrap().parse().unwrap()
}

#[test]
fn registered_route_is_dispatched() {
    assert_eq!(serve_one(handler()), 200);
}

#[test]
fn unmatched_url_falls_back_to_default_handler() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let h = handler();

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        h.handle(Box::new(stream));
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client
        .write_all(b"GET /nowhere HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    client.shutdown(std::net::Shutdown::Write).ok();

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    server.join().unwrap();

    let text = String::from_utf8_lossy(&buf);
    assert!(text.starts_with("HTTP/1.1 404"));
}

#[test]
fn malformed_request_line_gets_400_and_connection_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let h = handler();

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        h.handle(Box::new(stream));
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client.write_all(b"not a request at all\r\n\r\n").unwrap();
    client.shutdown(std::net::Shutdown::Write).ok();

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    server.join().unwrap();

    let text = String::from_utf8_lossy(&buf);
    assert!(text.starts_with("HTTP/1.1 400"));
}

#[test]
fn keepalive_serves_two_requests_on_one_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let h = handler();

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        h.handle(Box::new(stream));
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buf = [0u8; 4096];
    let n = client.read(&mut buf).unwrap();
    let first = String::from_utf8_lossy(&buf[..n]);
    assert!(first.starts_with("HTTP/1.1 200"));

    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    client.shutdown(std::net::Shutdown::Write).ok();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    server.join().unwrap();

    let second = String::from_utf8_lossy(&rest);
    assert!(second.starts_with("HTTP/1.1 200"));
}
