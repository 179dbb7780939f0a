//! Logging setup
//!
//! `RUST_LOG` wins when set; otherwise both crates log at `info`, or at
//! `debug` in debug mode.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directives.
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "croupier_server=debug,croupier_gateway=debug,tower_http=debug"
    } else {
        "croupier_server=info,croupier_gateway=info"
    }
}

/// Install the global tracing subscriber.
pub fn init_logging(debug: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }

    tracing::info!("Logging initialized");
}
