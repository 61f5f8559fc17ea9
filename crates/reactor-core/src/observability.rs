//! Tracing setup shared by the worker and CLI entry points.
//!
//! Call sites use `tracing`'s structured fields directly (`info!(port,
//! cell_id, "...")`) rather than string interpolation; this module only
//! owns subscriber initialization.

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `fmt` subscriber driven by `RUST_LOG`, defaulting to `info`.
///
/// Call once at process start, before any other tracing calls.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
    info!("reactor tracing initialised");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_does_not_panic_when_called_once() {
        // Subsequent calls in other test binaries are independent processes,
        // so a single call here is safe; a second call in-process would
        // return an error from `try_init`-style setup, which `init` ignores
        // by panicking, so we only exercise it once per test binary.
        init_tracing();
    }
}
