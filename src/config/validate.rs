use std::collections::{HashMap, HashSet};

use crate::config::types::ServerConfig;

/// Drops conflicting or structurally invalid server blocks before startup.
/// Grounded on this crate's predecessor's `config::validate::validate_configs`
/// (`src/config/validate.rs`) — same conflict/bind/file checks — logged via
/// `tracing` instead of colored `println!`.
pub fn validate_configs(configs: Vec<ServerConfig>) -> Vec<ServerConfig> {
    let mut conflict_indices = HashSet::new();

    let mut usage_map: HashMap<(String, u16, String), Vec<usize>> = HashMap::new();
    for (idx, config) in configs.iter().enumerate() {
        for port in &config.ports {
            let key = (config.host.clone(), *port, config.server_name.clone());
            usage_map.entry(key).or_default().push(idx);
        }
    }

    for ((host, port, server_name), indices) in usage_map {
        if indices.len() > 1 {
            tracing::warn!(
                host, port, server_name, "multiple servers share this host:port:name, dropping all"
            );
            conflict_indices.extend(indices);
        }
    }

    let mut port_hosts: HashMap<u16, HashSet<String>> = HashMap::new();
    for config in &configs {
        for port in &config.ports {
            port_hosts.entry(*port).or_default().insert(config.host.clone());
        }
    }
    for (port, hosts) in port_hosts {
        if hosts.contains("0.0.0.0") && hosts.len() > 1 {
            tracing::warn!(port, ?hosts, "wildcard bind conflicts with specific host on same port");
            for (idx, config) in configs.iter().enumerate() {
                if config.ports.contains(&port) {
                    conflict_indices.insert(idx);
                }
            }
        }
    }

    for (idx, config) in configs.iter().enumerate() {
        let mut valid = true;

        for (code, path) in &config.error_pages {
            if !(100..=599).contains(code) {
                tracing::warn!(server = %config.server_name, code, "invalid error page status code");
                valid = false;
            }
            if std::fs::File::open(path).is_err() {
                tracing::warn!(server = %config.server_name, code, path, "error page file not found");
                valid = false;
            }
        }

        for route in &config.routes {
            if std::fs::read_dir(&route.root).is_err() {
                tracing::warn!(
                    server = %config.server_name,
                    route = %route.path,
                    root = %route.root,
                    "route root directory does not exist"
                );
                valid = false;
            }
        }

        if !valid {
            conflict_indices.insert(idx);
        }
    }

    let dropped = conflict_indices.len();
    let valid_configs: Vec<ServerConfig> = configs
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !conflict_indices.contains(idx))
        .map(|(_, c)| c)
        .collect();

    if dropped > 0 {
        tracing::warn!(dropped, "configurations dropped due to conflicts");
    }

    valid_configs
}
