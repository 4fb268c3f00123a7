//! Structured logging bootstrap. Replaces this crate's predecessor's hand-rolled
//! `proxy_log` macro crate (ANSI `log!`/`info!`/`warn!`/`errors!` macros over
//! a broken `format_time`) with `tracing` + `tracing-subscriber`, the crate
//! the rest of the pack reaches for (e.g. `sl224-casparianflow`).

use tracing_subscriber::EnvFilter;

/// `verbosity` mirrors the CLI's repeated `-v` flag: 0 = info, 1 = debug,
/// 2+ = trace. `RUST_LOG` always wins when set.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("adp_server={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
