//! Connection queue + worker pool (spec.md §4.F). A single FIFO queue of
//! pending connections guarded by one mutex and one CV; a pool of plain OS
//! threads drains it. Grounded on the `parking_lot::{Mutex, Condvar}`
//! admission pattern already used in [`crate::limits`], generalized from
//! "block until capacity" to "block until work or shutdown".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::driver::ByteStream;

struct Inner {
    queue: VecDeque<Box<dyn ByteStream>>,
    draining: bool,
}

/// The FIFO connection queue. `enqueue` is called from acceptor threads;
/// `dequeue` is called from worker threads.
pub struct ConnectionQueue {
    inner: Mutex<Inner>,
    cv: Condvar,
    max_conns: usize,
}

impl ConnectionQueue {
    pub fn new(max_conns: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { queue: VecDeque::new(), draining: false }),
            cv: Condvar::new(),
            max_conns,
        }
    }

    /// Rejects with `WouldBlock` once the queue is at `max_conns` (spec.md
    /// §4.F does not specify queuing beyond this bound, so the acceptor
    /// simply drops it). On rejection the stream is handed back in the `Err`
    /// so the caller can close it explicitly rather than relying on `Drop`.
    pub fn enqueue(
        &self,
        stream: Box<dyn ByteStream>,
    ) -> Result<(), (std::io::Error, Box<dyn ByteStream>)> {
        let mut g = self.inner.lock();
        if g.draining {
            return Err((std::io::Error::new(std::io::ErrorKind::Other, "queue draining"), stream));
        }
        if g.queue.len() >= self.max_conns {
            return Err((std::io::Error::new(std::io::ErrorKind::WouldBlock, "queue full"), stream));
        }
        g.queue.push_back(stream);
        self.cv.notify_one();
        Ok(())
    }

    /// Waits up to `timeout` for work. Returns `None` on timeout or when the
    /// queue is draining and empty (the caller should exit).
    fn dequeue(&self, timeout: Duration) -> Option<Box<dyn ByteStream>> {
        let mut g = self.inner.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(stream) = g.queue.pop_front() {
                return Some(stream);
            }
            if g.draining {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let result = self.cv.wait_for(&mut g, remaining);
            if result.timed_out() {
                continue;
            }
        }
    }

    pub fn begin_drain(&self) {
        let mut g = self.inner.lock();
        g.draining = true;
        drop(g);
        self.cv.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

/// Per-connection handling hook. The pool calls this once per dequeued
/// stream; everything past "how do I get bytes" (parsing, dispatch,
/// filters, response) lives in [`crate::connection`].
pub type Handler = Arc<dyn Fn(Box<dyn ByteStream>) + Send + Sync>;

pub struct PoolConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    pub conns_per_thread: u64,
    pub idle_timeout: Duration,
}

/// Drives the min/max/spawn/idle-shrink/per-thread-lifetime rules of
/// spec.md §4.F. Workers are plain `std::thread` spawns (no async runtime:
/// spec.md explicitly models the pool as OS threads).
pub struct WorkerPool {
    queue: Arc<ConnectionQueue>,
    config: PoolConfig,
    handler: Handler,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<ConnectionQueue>, config: PoolConfig, handler: Handler, shutdown: Arc<AtomicBool>) -> Arc<Self> {
        let pool = Arc::new(Self {
            queue,
            config,
            handler,
            shutdown,
            active: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
        });
        for _ in 0..pool.config.min_threads {
            pool.spawn_worker(true);
        }
        pool
    }

    /// Called whenever a connection is enqueued with no idle worker ready
    /// (spec.md §4.F "Spawn rule"). `permanent` workers (the initial `min`)
    /// never shrink on idle; on-demand workers do.
    pub fn maybe_spawn(self: &Arc<Self>) {
        if self.active.load(Ordering::SeqCst) < self.config.max_threads {
            self.spawn_worker(false);
        }
    }

    fn spawn_worker(self: &Arc<Self>, permanent: bool) {
        if self.active.fetch_add(1, Ordering::SeqCst) >= self.config.max_threads {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        let queue = Arc::clone(&self.queue);
        let handler = Arc::clone(&self.handler);
        let shutdown = Arc::clone(&self.shutdown);
        let active = Arc::clone(&self.active);
        let idle_timeout = self.config.idle_timeout;
        let conns_per_thread = self.config.conns_per_thread;
        let min_threads = self.config.min_threads;

        let handle = std::thread::spawn(move || {
            let mut served = 0u64;
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    match queue.dequeue(Duration::from_millis(0)) {
                        Some(stream) => handler(stream),
                        None => break,
                    }
                } else {
                    match queue.dequeue(idle_timeout) {
                        Some(stream) => {
                            handler(stream);
                            served += 1;
                        }
                        None => {
                            // Idle timeout fired. Permanent workers stay
                            // alive; on-demand workers shrink once the pool
                            // is back above `min` live threads.
                            if !permanent && active.load(Ordering::SeqCst) > min_threads {
                                break;
                            }
                            continue;
                        }
                    }
                }
                if conns_per_thread > 0 && served >= conns_per_thread {
                    info!(served, "worker recycling after reaching per-thread connection limit");
                    break;
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });
        self.handles.lock().push(handle);
    }

    /// Marks the queue draining and waits up to `timeout` for all workers to
    /// finish their current request and exit (spec.md §4.F "Stop").
    pub fn shutdown_and_join(&self, timeout: Duration) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.begin_drain();
        let deadline = Instant::now() + timeout;
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("worker pool shutdown deadline exceeded, abandoning remaining threads");
                break;
            }
            // `JoinHandle::join` has no timeout variant; workers are
            // expected to notice `shutdown` promptly since the queue is
            // already draining and idle waits are bounded by idle_timeout.
            let _ = handle.join();
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    struct FakeStream(Vec<u8>);
    impl io::Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            Ok(n)
        }
    }
    impl io::Write for FakeStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    impl ByteStream for FakeStream {
        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn enqueue_then_dequeue_is_fifo() {
        let q = ConnectionQueue::new(8);
        q.enqueue(Box::new(FakeStream(vec![1]))).unwrap();
        q.enqueue(Box::new(FakeStream(vec![2]))).unwrap();
        let mut first = q.dequeue(Duration::from_millis(10)).unwrap();
        let mut buf = [0u8; 1];
        first.read(&mut buf).unwrap();
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn queue_rejects_past_capacity() {
        let q = ConnectionQueue::new(1);
        q.enqueue(Box::new(FakeStream(vec![]))).unwrap();
        let err = q.enqueue(Box::new(FakeStream(vec![])));
        assert!(err.is_err());
    }

    #[test]
    fn workers_process_enqueued_connections() {
        let q = Arc::new(ConnectionQueue::new(8));
        let processed = Arc::new(StdAtomicUsize::new(0));
        let processed2 = Arc::clone(&processed);
        let shutdown = Arc::new(AtomicBool::new(false));
        let pool = WorkerPool::new(
            Arc::clone(&q),
            PoolConfig {
                min_threads: 2,
                max_threads: 4,
                conns_per_thread: 0,
                idle_timeout: Duration::from_millis(50),
            },
            Arc::new(move |_s| {
                processed2.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::clone(&shutdown),
        );
        for _ in 0..5 {
            q.enqueue(Box::new(FakeStream(vec![]))).unwrap();
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(processed.load(Ordering::SeqCst), 5);
        pool.shutdown_and_join(Duration::from_secs(1));
    }

    #[test]
    fn shutdown_drains_queue_before_workers_exit() {
        let q = Arc::new(ConnectionQueue::new(8));
        let processed = Arc::new(StdAtomicUsize::new(0));
        let processed2 = Arc::clone(&processed);
        let shutdown = Arc::new(AtomicBool::new(false));
        for _ in 0..3 {
            q.enqueue(Box::new(FakeStream(vec![]))).unwrap();
        }
        let pool = WorkerPool::new(
            Arc::clone(&q),
            PoolConfig {
                min_threads: 1,
                max_threads: 1,
                conns_per_thread: 0,
                idle_timeout: Duration::from_millis(20),
            },
            Arc::new(move |_s| {
                processed2.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::clone(&shutdown),
        );
        pool.shutdown_and_join(Duration::from_secs(1));
        assert_eq!(processed.load(Ordering::SeqCst), 3);
    }
}
