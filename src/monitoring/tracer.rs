/*!
 * Tracing Setup
 * Structured logging initialization for hosts and tests
 */

use std::sync::Once;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize structured tracing once per process
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
///
/// Safe to call from every test or embedding host; only the first call
/// installs the subscriber.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .compact(),
            )
            .init();
        info!("structured tracing initialized");
    });
}
