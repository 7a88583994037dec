use super::config::{LogConfig, LogFormat, RotationPolicy};
use anyhow::Result;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logger implementation using tracing
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    /// Initialize the global subscriber with the given configuration.
    ///
    /// `RUST_LOG` overrides the configured level. The returned value owns the
    /// file writer guard and must be kept alive for the duration of the program.
    pub fn init(config: &LogConfig) -> Result<Self> {
        parse_log_level(&config.level)?;
        parse_log_level(&config.candidate_level)?;
        let directives = config.directives();
        let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

        let (file_layer, guard) = match config.file_dir {
            Some(ref dir) => {
                let name = config.file_name.as_str();
                let appender = match config.file_rotation {
                    RotationPolicy::Daily => rolling::daily(dir, name),
                    RotationPolicy::Hourly => rolling::hourly(dir, name),
                    RotationPolicy::Never => rolling::never(dir, name),
                };
                let (writer, guard) = tracing_appender::non_blocking(appender);

                // Files always get JSON
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_filter(env_filter());
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let terminal_layer = config.stderr.then(|| match config.format {
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_current_span(true)
                .with_target(true)
                .with_filter(env_filter())
                .boxed(),
            LogFormat::Pretty => tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(io::stderr)
                .with_target(true)
                .with_filter(env_filter())
                .boxed(),
        });

        tracing_subscriber::registry()
            .with(file_layer)
            .with(terminal_layer)
            .try_init()?;

        tracing::debug!(
            directives = %directives,
            format = ?config.format,
            file_output = config.file_dir.is_some(),
            "logger initialized"
        );

        Ok(Self { _guard: guard })
    }
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
    }
}

/// Whether `level` names a valid log level.
pub fn is_valid_level(level: &str) -> bool {
    parse_log_level(level).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("WARN"), Ok(Level::WARN)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_logger_init_with_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            level: "debug".to_string(),
            format: LogFormat::Json,
            stderr: false,
            file_dir: Some(dir.path().to_path_buf()),
            file_name: "run.log".to_string(),
            ..LogConfig::default()
        };

        // Installs the global subscriber; this is the only test that does so.
        let logger = LoggerImpl::init(&config).unwrap();
        tracing::info!(iteration = 3, "written to file");
        tracing::debug!(target: "candidate", "hidden candidate line");
        drop(logger);

        let content = std::fs::read_to_string(dir.path().join("run.log")).unwrap();
        assert!(content.contains("written to file"));
        assert!(!content.contains("hidden candidate line"));
    }
}
