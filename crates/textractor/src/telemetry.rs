//! Tracing setup for embedding shells.
//!
//! The library itself never installs a subscriber; the process hosting it
//! calls [`init`] once at startup. Repeated calls are harmless, which keeps
//! test binaries simple.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber honoring `RUST_LOG` (default `info`) and
/// bridges `log` records into tracing.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = tracing_log::LogTracer::init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::info!("telemetry initialized twice without panicking");
        log::info!("log bridge active");
    }
}
