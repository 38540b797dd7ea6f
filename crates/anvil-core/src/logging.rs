//! Global `tracing` subscriber setup for binaries embedding this engine.
//!
//! The engine itself never calls `println!` or configures a subscriber on
//! its own; every module only emits `tracing` events. This is the one place
//! that wires a subscriber, left for the embedding binary to call once at
//! startup.

use tracing_subscriber::{EnvFilter, fmt};

/// Initialize a global `tracing` subscriber from `$RUST_LOG` (default
/// `info`), writing structured JSON to stderr. Call once, from `main`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).json().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_does_not_panic_when_called_once() {
        init_logging();
    }
}
