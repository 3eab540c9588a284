//! Tracing setup for binaries embedding the library

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize JSON-formatted structured logging with `RUST_LOG` filtering.
pub fn init() {
    let fmt_layer = fmt::layer().with_target(false).with_thread_ids(true).json();

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
