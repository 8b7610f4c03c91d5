use formflow_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber from the loaded configuration.
/// Safe to call more than once; only the first call takes effect.
pub fn init(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber was already installed");
    }
}

#[cfg(test)]
mod tests {
    use formflow_core::config::{LogFormat, LoggingConfig};

    use super::init;

    #[test]
    fn repeated_initialization_is_harmless() {
        let config =
            LoggingConfig { level: "debug".to_string(), format: LogFormat::Compact };
        init(&config);
        init(&config);

        let garbled =
            LoggingConfig { level: "not a filter ((".to_string(), format: LogFormat::Json };
        init(&garbled);
    }
}
