use std::collections::HashMap;

use config_lang_derive::FromConfig;

/// Config surface enumerated in spec.md §6, plus the server/route tree
/// grounded on this crate's predecessor's `config_handler::types` (now folded in here).
/// Every field has a default so a config file only needs to mention what it
/// overrides — matching this crate's predecessor's `Default` + `#[derive(FromYaml)]`
/// pairing.
#[derive(Debug, Clone, FromConfig)]
pub struct AppConfig {
    pub shutdown_timeout: u64,
    pub listen_backlog: i32,
    pub min_threads: usize,
    pub max_threads: usize,
    pub conns_per_thread: u64,
    pub thread_timeout: u64,
    pub max_conns: usize,
    pub max_dropped: usize,
    pub content_cache: ContentCacheConfig,
    pub adp: AdpConfig,
    pub limits: HashMap<String, LimitsDef>,
    pub http: HttpConfig,
    pub keepalive: KeepaliveConfig,
    pub pidfile: String,
    pub servers: Vec<ServerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert("default".to_string(), LimitsDef::default());
        Self {
            shutdown_timeout: 30,
            listen_backlog: 511,
            min_threads: 4,
            max_threads: 32,
            conns_per_thread: 10_000,
            thread_timeout: 120,
            max_conns: 1024,
            max_dropped: 128,
            content_cache: ContentCacheConfig::default(),
            adp: AdpConfig::default(),
            limits,
            http: HttpConfig::default(),
            keepalive: KeepaliveConfig::default(),
            pidfile: "adp-server.pid".to_string(),
            servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, FromConfig)]
pub struct ContentCacheConfig {
    pub enabled: bool,
    pub size: usize,
    pub per_entry_limit: usize,
    pub mmap: bool,
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 10 * 1024 * 1024,
            per_entry_limit: 512 * 1024,
            mmap: false,
        }
    }
}

#[derive(Debug, Clone, FromConfig)]
pub struct AdpConfig {
    pub cache: bool,
    pub cache_size: usize,
    pub enable_debug: bool,
    pub enable_expire: bool,
    pub tag_locks: bool,
}

impl Default for AdpConfig {
    fn default() -> Self {
        Self {
            cache: true,
            cache_size: 1000,
            enable_debug: false,
            enable_expire: false,
            tag_locks: false,
        }
    }
}

/// One named entry of the limits registry (spec.md §4.D); `"default"` must
/// always be present, enforced by `config::validate`.
#[derive(Debug, Clone, FromConfig)]
pub struct LimitsDef {
    pub maxrun: u32,
    pub maxwait: u32,
    pub maxupload: usize,
    pub timeout: u64,
}

impl Default for LimitsDef {
    fn default() -> Self {
        Self {
            maxrun: 100,
            maxwait: 100,
            maxupload: 1024 * 1024,
            timeout: 30,
        }
    }
}

#[derive(Debug, Clone, FromConfig)]
pub struct HttpConfig {
    pub major: u8,
    pub minor: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { major: 1, minor: 1 }
    }
}

#[derive(Debug, Clone, FromConfig)]
pub struct KeepaliveConfig {
    pub max: u32,
    pub timeout: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self { max: 100, timeout: 5 }
    }
}

#[derive(Debug, Clone, FromConfig)]
pub struct ServerConfig {
    pub server_name: String,
    pub host: String,
    pub ports: Vec<u16>,
    pub default_server: bool,
    pub root: String,
    pub routes: Vec<RouteConfig>,
    pub error_pages: HashMap<u16, String>,
    pub directory_index: Vec<String>,
    pub client_max_body_size: usize,
    pub autoindex: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "default".to_string(),
            host: "0.0.0.0".to_string(),
            ports: vec![8080],
            default_server: true,
            root: "./www".to_string(),
            routes: Vec::new(),
            error_pages: HashMap::new(),
            directory_index: vec!["index.html".to_string(), "index.adp".to_string()],
            client_max_body_size: 1024 * 1024,
            autoindex: false,
        }
    }
}

#[derive(Debug, Clone, FromConfig)]
pub struct RouteConfig {
    pub path: String,
    pub methods: Vec<String>,
    pub root: String,
    pub default_file: String,
    pub autoindex: bool,
    pub redirection: Option<String>,
    pub redirect_code: Option<u16>,
    pub limits: Option<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            methods: vec!["GET".to_string(), "HEAD".to_string()],
            root: "./www".to_string(),
            default_file: "index.html".to_string(),
            autoindex: false,
            redirection: None,
            redirect_code: None,
            limits: None,
        }
    }
}

impl ServerConfig {
    pub fn find_route(&self, url: &str, method: &str) -> Option<&RouteConfig> {
        self.routes
            .iter()
            .filter(|r| url.starts_with(r.path.as_str()))
            .max_by_key(|r| r.path.len())
            .filter(|r| r.methods.iter().any(|m| m == method))
    }
}
