//! Tracing setup for the binary
//!
//! Hooks run inside other programs that may read our stdout, so logs always go
//! to stderr. Quiet by default; `TETHER_DEBUG` or `--debug` turns on debug
//! output for this crate, and `RUST_LOG` is honored on top of that.

use tracing_subscriber::EnvFilter;

pub const DEBUG_ENV: &str = "TETHER_DEBUG";

/// True when debug logging was requested through the environment.
pub fn debug_requested() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

pub fn init_tracing(debug: bool) {
    let level = if debug || debug_requested() {
        "tether=debug"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
}
