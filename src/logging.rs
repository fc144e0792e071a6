use crate::config::EngineConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Logs go to stderr so CLI output on stdout stays machine-readable. Calling this
/// twice is harmless; the second call is ignored.
pub fn init_logging(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.use_json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_ansi(false);
        registry.with(layer).try_init()
    } else {
        let layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        registry.with(layer).try_init()
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}
