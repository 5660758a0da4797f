//! Logging setup shared by both binaries.
//!
//! Installs a global `tracing` subscriber that writes to stderr. `RUST_LOG`
//! takes precedence; otherwise the level is `info`, or `debug` when verbose.

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "churnforge=debug,info"
    } else {
        "info"
    }
}

/// Initialize the global subscriber.
///
/// Subsequent calls are no-ops, so tests and binaries may both call it.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert!(default_directive(true).contains("debug"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init(false);
        init(true);
        tracing::info!("logging initialized twice");
    }
}
