use crate::config::Environment;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber: pretty output in development, JSON lines
/// in production. Filtering comes from `RUST_LOG`, `info` when unset.
///
/// Workers log from several threads at once, so thread names are included.
pub fn setup_logging(environment: &Environment) {
    let registry = tracing_subscriber::registry().with(env_filter());

    match environment {
        Environment::Production => registry
            .with(
                fmt::layer()
                    .json()
                    .with_level(true)
                    .with_thread_names(true),
            )
            .init(),
        Environment::Development => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_names(true),
            )
            .init(),
    }
}
