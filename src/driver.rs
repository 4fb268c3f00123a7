//! Driver framework (spec.md §4.A). A driver is a capability set: `read`,
//! `write`, `close` are required; `accept` is optional and, when present,
//! gets a dedicated acceptor thread whose only job is `loop: accept ->
//! enqueue` (spec.md §9 "Dynamic dispatch": variant with required ops plus
//! optional ops behind presence tests). Grounded on this crate's predecessor's
//! `TcpListener`/`TcpStream` usage in `src/bin/main.rs`, generalized to a
//! trait so the pool (component F) doesn't care which byte-stream provider
//! fed it.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info, warn};

use crate::pool::ConnectionQueue;

/// One accepted byte stream, handed to a worker by the connection queue.
/// Required ops only; `peer_addr` is the one optional op the core actually
/// needs (logging), everything else (sendfd/sendfile/detach/fd in the
/// original ABI) is plumbing the request-serving core never calls directly.
pub trait ByteStream: io::Read + io::Write + Send {
    fn close(&mut self) -> io::Result<()>;
    fn peer_addr(&self) -> Option<String> {
        None
    }
    fn set_read_timeout(&self, _dur: Option<std::time::Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Both)
    }
    fn peer_addr(&self) -> Option<String> {
        TcpStream::peer_addr(self).ok().map(|a| a.to_string())
    }
    fn set_read_timeout(&self, dur: Option<std::time::Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }
}

/// Driver capability set. `start`/`stop` bracket the driver's lifetime;
/// `run_acceptor` is only invoked when `has_acceptor()` is true.
pub trait Driver: Send {
    fn name(&self) -> &str;
    fn start(&mut self) -> io::Result<()> {
        Ok(())
    }
    fn stop(&mut self) {}
    fn has_acceptor(&self) -> bool {
        false
    }
    /// Runs until `shutdown` is observed or the listener errors out.
    /// `on_enqueue` is the pool's spawn-rule hook (spec.md §4.F): called once
    /// per connection successfully handed to the queue, so the pool can grow
    /// past `min_threads` when the dispatch rate demands it.
    fn run_acceptor(
        &mut self,
        _queue: Arc<ConnectionQueue>,
        _shutdown: Arc<AtomicBool>,
        _on_enqueue: Arc<dyn Fn() + Send + Sync>,
    ) {
    }
}

pub struct TcpDriver {
    name: String,
    addr: String,
    listener: Option<TcpListener>,
}

impl TcpDriver {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            listener: None,
        }
    }
}

impl Driver for TcpDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> io::Result<()> {
        let listener = TcpListener::bind(&self.addr)?;
        // Non-blocking so the acceptor loop can poll `shutdown` between
        // accepts instead of blocking in `accept()` forever.
        listener.set_nonblocking(true)?;
        self.listener = Some(listener);
        Ok(())
    }

    fn stop(&mut self) {
        self.listener = None;
    }

    fn has_acceptor(&self) -> bool {
        true
    }

    fn run_acceptor(
        &mut self,
        queue: Arc<ConnectionQueue>,
        shutdown: Arc<AtomicBool>,
        on_enqueue: Arc<dyn Fn() + Send + Sync>,
    ) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        info!(driver = %self.name, addr = %self.addr, "acceptor started");
        while !shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false).ok();
                    let stream: Box<dyn ByteStream> = Box::new(stream);
                    match queue.enqueue(stream) {
                        Ok(()) => on_enqueue(),
                        Err((e, mut stream)) => {
                            warn!(driver = %self.name, %peer, error = %e, "enqueue failed, closing connection");
                            let _ = stream.close();
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    continue;
                }
                Err(e) => {
                    error!(driver = %self.name, error = %e, "accept failed");
                    break;
                }
            }
        }
        info!(driver = %self.name, "acceptor stopped");
    }
}

/// Process-wide, registration-ordered driver list (spec.md §3 "Driver").
#[derive(Default)]
pub struct DriverSet {
    drivers: Vec<Box<dyn Driver>>,
}

impl DriverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Box<dyn Driver>) {
        self.drivers.push(driver);
    }

    /// Starts every registered driver in registration order, then spawns one
    /// acceptor thread per driver that has one, each running `loop: accept ->
    /// enqueue` until `shutdown` flips. A driver that fails to start is
    /// logged and skipped — the server keeps serving on the rest
    /// (spec.md §4.A). Consumes the set: each driver moves onto its own
    /// thread for the remainder of the process.
    pub fn start_all(
        self,
        queue: Arc<ConnectionQueue>,
        shutdown: Arc<AtomicBool>,
        on_enqueue: Arc<dyn Fn() + Send + Sync>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for mut driver in self.drivers {
            if let Err(e) = driver.start() {
                error!(driver = %driver.name(), error = %e, "driver failed to start, skipping");
                continue;
            }
            if !driver.has_acceptor() {
                continue;
            }
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            let on_enqueue = Arc::clone(&on_enqueue);
            handles.push(std::thread::spawn(move || {
                let mut driver = driver;
                driver.run_acceptor(queue, shutdown, on_enqueue);
                driver.stop();
            }));
        }
        handles
    }
}
