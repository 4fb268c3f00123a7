pub mod display;
pub mod types;
pub mod validate;

use std::path::Path;

use config_lang::FromConfig;

pub use display::display_config;
pub use types::{AppConfig, HttpConfig, KeepaliveConfig, LimitsDef, RouteConfig, ServerConfig};
pub use validate::validate_configs;

use crate::error::{AdpError, Result};

/// Loads, parses and validates the config file, matching the bootstrap order
/// in spec.md §9 ("Configuration is applied during a distinct bootstrap
/// phase"). Grounded on this crate's predecessor's `src/bin/main.rs` load sequence
/// (`AppConfig::from_str` then `display_config`), with `validate_configs`
/// inserted between parse and use.
pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)?;
    let mut config = AppConfig::from_str(&source).map_err(|source| AdpError::Config {
        path: path.to_path_buf(),
        source,
    })?;
    config.servers = validate_configs(std::mem::take(&mut config.servers));
    if !config.limits.contains_key("default") {
        config.limits.insert("default".to_string(), LimitsDef::default());
    }
    Ok(config)
}
