use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initialize the tracing subscriber. `RUST_LOG` filters as usual;
/// `RUST_LOG_FORMAT=json` switches to machine-readable output for log
/// shippers, anything else gets the compact human format.
pub fn init() {
    let env_filter =
        EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy();

    let format = std::env::var("RUST_LOG_FORMAT").unwrap_or_default();
    let log_layer = match format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer().compact().with_filter(env_filter).boxed(),
    };

    tracing_subscriber::registry().with(log_layer).init();
}
