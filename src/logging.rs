use std::env;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Noisy HTTP internals stay at warn unless asked for explicitly.
const DEFAULT_FILTER: &str = "info,ureq=warn,rustls=warn";

/// Installs the compact stderr subscriber. `RUST_LOG` overrides the default
/// filter; an unparsable value falls back to it. Safe to call twice.
pub fn init_logging() {
    let filter = env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .and_then(|value| EnvFilter::builder().parse(value).ok())
        .unwrap_or_else(default_filter);

    let layer = Layer::default().compact().with_writer(std::io::stderr);
    let _ = Registry::default().with(filter).with(layer).try_init();
}

fn default_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}
