//! Process bootstrap and shutdown orchestration. Wires the independently
//! testable components (driver set, limits registry, filter pipeline,
//! connection queue + worker pool, fast-path responder) into one running
//! server, the way this crate's predecessor's `src/server.rs` wires its `mio`-based
//! accept loop — generalized here from one fixed loop into the
//! component-per-module shape spec.md §2 describes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::adp::{BasicEngine, TagRegistry};
use crate::cache::ContentCache;
use crate::config::AppConfig;
use crate::connection::{build_handlers, ConnectionHandler};
use crate::driver::{DriverSet, TcpDriver};
use crate::error::Result;
use crate::fastpath::{FastPathConfig, FastPathResponder};
use crate::filters::Pipeline;
use crate::limits::LimitsRegistry;
use crate::pidfile::PidFile;
use crate::pool::{ConnectionQueue, PoolConfig, WorkerPool};

pub struct Server {
    config: AppConfig,
}

impl Server {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Starts every driver, the worker pool, and blocks until SIGINT/SIGTERM
    /// (via `ctrlc`) or an internal shutdown request, then drains
    /// gracefully. Mirrors the seven-step request lifecycle assembly in
    /// spec.md §4.I, wired once at process scope.
    pub fn run(self) -> Result<()> {
        let _pidfile = PidFile::create(self.config.pidfile.clone())?;

        let limits = Arc::new(LimitsRegistry::new(&self.config.limits));
        let pipeline = Arc::new(Pipeline::new());
        let content_cache = Arc::new(ContentCache::new(
            self.config.content_cache.size,
            self.config.content_cache.per_entry_limit,
        ));

        let mut bind_addrs: HashMap<String, String> = HashMap::new();
        for server in &self.config.servers {
            for port in &server.ports {
                let addr = format!("{}:{}", server.host, port);
                bind_addrs.entry(addr.clone()).or_insert_with(|| server.server_name.clone());
            }
        }

        let queue = Arc::new(ConnectionQueue::new(self.config.max_conns));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut driver_set = DriverSet::new();
        for (addr, server_name) in &bind_addrs {
            driver_set.register(Box::new(TcpDriver::new(server_name.clone(), addr.clone())));
        }

        let default_server = self
            .config
            .servers
            .iter()
            .find(|s| s.default_server)
            .or_else(|| self.config.servers.first())
            .cloned()
            .unwrap_or_default();

        let fastpath = Arc::new(
            FastPathResponder::new(
                FastPathConfig {
                    page_root: default_server.root.clone().into(),
                    directory_index: default_server.directory_index.clone(),
                    cache_enabled: self.config.content_cache.enabled,
                    autoindex: default_server.autoindex,
                    mmap: self.config.content_cache.mmap,
                },
                Arc::clone(&content_cache),
            )
            .with_adp(Arc::new(TagRegistry::new()), Arc::new(BasicEngine)),
        );
        let fastpath_handler: crate::connection::Handler = {
            let fastpath = Arc::clone(&fastpath);
            Arc::new(move |ctx, stream| fastpath.handle(ctx, stream))
        };
        let handlers = Arc::new(build_handlers(&default_server, fastpath_handler));

        let connection_handler = Arc::new(ConnectionHandler {
            limits: Arc::clone(&limits),
            pipeline: Arc::clone(&pipeline),
            handlers,
            max_header_bytes: 8192,
            max_body_bytes: default_server.client_max_body_size,
        });

        let pool = WorkerPool::new(
            Arc::clone(&queue),
            PoolConfig {
                min_threads: self.config.min_threads,
                max_threads: self.config.max_threads,
                conns_per_thread: self.config.conns_per_thread,
                idle_timeout: Duration::from_secs(self.config.thread_timeout),
            },
            Arc::new(move |stream| connection_handler.handle(stream)),
            Arc::clone(&shutdown),
        );

        // spec.md §4.F's spawn rule: the acceptor hands the pool a chance to
        // grow past `min_threads` every time it dispatches a connection.
        let spawn_hook: Arc<dyn Fn() + Send + Sync> = {
            let pool = Arc::clone(&pool);
            Arc::new(move || pool.maybe_spawn())
        };
        let acceptor_handles = driver_set.start_all(Arc::clone(&queue), Arc::clone(&shutdown), spawn_hook);

        let shutdown_for_signal = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("shutdown signal received");
            shutdown_for_signal.store(true, Ordering::SeqCst);
        })
        .map_err(|e| crate::error::AdpError::DriverStart {
            name: "signal-handler".to_string(),
            message: e.to_string(),
        })?;

        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));
        }

        info!("draining connections");
        pool.shutdown_and_join(Duration::from_secs(self.config.shutdown_timeout));
        for handle in acceptor_handles {
            if handle.join().is_err() {
                warn!("acceptor thread panicked during shutdown");
            }
        }
        info!("shutdown complete");
        Ok(())
    }
}
