use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::infrastructure::logging::logger::is_valid_level;

/// Project configuration file, created by hand or copied from the README
pub const PROJECT_CONFIG: &str = ".metaopt/config.yaml";

/// Untracked local overrides
pub const LOCAL_CONFIG: &str = ".metaopt/local.yaml";

/// Environment variable prefix; `__` separates nested keys
pub const ENV_PREFIX: &str = "METAOPT_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be at least 1")]
    ZeroValue { field: &'static str },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid temperature: {value}. Must be within 0.0..={max} for the configured provider")]
    InvalidTemperature { value: f64, max: f64 },

    #[error("Invalid fail value: {0}. Must be finite")]
    InvalidFailValue(f64),

    #[error("Invalid extension `{0}`: must be non-empty and must not start with '.'")]
    InvalidExtension(String),

    #[error("{0} cannot be empty")]
    EmptyValue(&'static str),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .metaopt/config.yaml
    /// 3. .metaopt/local.yaml
    /// 4. `explicit` file, when given
    /// 5. Environment variables (`METAOPT_*`)
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(PROJECT_CONFIG))
            .merge(Yaml::file(LOCAL_CONFIG));

        if let Some(path) = explicit {
            anyhow::ensure!(path.exists(), "config file {} not found", path.display());
            figment = figment.merge(Yaml::file(path));
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a single file on top of the defaults
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.task.trim().is_empty() {
            return Err(ConfigError::EmptyValue("task"));
        }
        if config.subtask.trim().is_empty() {
            return Err(ConfigError::EmptyValue("subtask"));
        }

        let lm = &config.language_model;
        if lm.max_responses_per_call == 0 {
            return Err(ConfigError::ZeroValue {
                field: "language_model.max_responses_per_call",
            });
        }
        if lm.call_budget == 0 {
            return Err(ConfigError::ZeroValue {
                field: "language_model.call_budget",
            });
        }
        let max_temperature = config.generator.provider.max_temperature();
        if !(0.0..=max_temperature).contains(&lm.temperature) {
            return Err(ConfigError::InvalidTemperature {
                value: lm.temperature,
                max: max_temperature,
            });
        }

        if config.utility.meta_tests == 0 {
            return Err(ConfigError::ZeroValue {
                field: "utility.meta_tests",
            });
        }
        if !config.utility.fail_value.is_finite() {
            return Err(ConfigError::InvalidFailValue(config.utility.fail_value));
        }

        let sandbox = &config.sandbox;
        if sandbox.max_workers == 0 {
            return Err(ConfigError::ZeroValue {
                field: "sandbox.max_workers",
            });
        }
        if sandbox.load_attempts == 0 {
            return Err(ConfigError::ZeroValue {
                field: "sandbox.load_attempts",
            });
        }
        if sandbox.improver_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue {
                field: "sandbox.improver_timeout_secs",
            });
        }

        if config.runtime.program.trim().is_empty() {
            return Err(ConfigError::EmptyValue("runtime.program"));
        }
        let ext = &config.runtime.extension;
        if ext.is_empty() || ext.starts_with('.') {
            return Err(ConfigError::InvalidExtension(ext.clone()));
        }

        if config.generator.max_retries == 0 {
            return Err(ConfigError::ZeroValue {
                field: "generator.max_retries",
            });
        }
        if config.generator.requests_per_second == 0 {
            return Err(ConfigError::ZeroValue {
                field: "generator.requests_per_second",
            });
        }

        for level in [&config.logging.level, &config.logging.candidate_level] {
            if !is_valid_level(level) {
                return Err(ConfigError::InvalidLogLevel(level.clone()));
            }
        }
        if config.logging.file_name.trim().is_empty() {
            return Err(ConfigError::EmptyValue("logging.file_name"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::{GeneratorProvider, HarnessKind};
    use crate::infrastructure::logging::LogFormat;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.language_model.max_responses_per_call, 6);
        assert_eq!(config.language_model.call_budget, 4);
        assert_eq!(config.utility.meta_budget, 25);
        assert_eq!(config.utility.meta_tests, 5);
        assert_eq!(config.n_iterations, 6);
        assert_eq!(config.sandbox.improver_timeout_secs, 7200);
        assert!(config.iterative);
        assert!(!config.sandbox.use_timeout_in_improver);
        assert_eq!(config.runtime.harness, HarnessKind::Python);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
task: meta_optimization
subtask: max_cut
iterative: false
n_iterations: 3
language_model:
  use_cache: true
  call_budget: 2
sandbox:
  use_timeout_in_improver: true
  improver_timeout_secs: 60
runtime:
  program: /usr/bin/python3.11
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.subtask, "max_cut");
        assert!(!config.iterative);
        assert_eq!(config.n_iterations, 3);
        assert!(config.language_model.use_cache);
        assert_eq!(config.language_model.call_budget, 2);
        assert_eq!(config.language_model.max_responses_per_call, 6);
        assert!(config.sandbox.use_timeout_in_improver);
        assert_eq!(config.sandbox.improver_timeout_secs, 60);
        assert_eq!(config.runtime.program, "/usr/bin/python3.11");
        assert_eq!(config.runtime.extension, "py");
        assert_eq!(config.logging.format, LogFormat::Json);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_call_budget() {
        let mut config = Config::default();
        config.language_model.call_budget = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroValue {
                field: "language_model.call_budget"
            })
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_dotted_extension() {
        let mut config = Config::default();
        config.runtime.extension = ".py".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidExtension(_))
        ));
    }

    #[test]
    fn test_validate_temperature_range() {
        let mut config = Config::default();
        config.language_model.temperature = 3.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTemperature { .. })
        ));
    }

    #[test]
    fn test_validate_temperature_per_provider() {
        let mut config = Config::default();
        config.language_model.temperature = 1.5;

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidTemperature { value, max }) => {
                assert!((value - 1.5).abs() < f64::EPSILON);
                assert!((max - 1.0).abs() < f64::EPSILON);
            }
            other => panic!("Expected InvalidTemperature error, got {other:?}"),
        }

        config.generator.provider = GeneratorProvider::Mock;
        ConfigLoader::validate(&config).expect("Mock provider accepts temperatures up to 2.0");
    }

    #[test]
    fn test_default_utility_deadline_is_bounded() {
        let config = Config::default();
        assert_eq!(config.utility.timeout_secs, Some(600));

        let yaml = "utility:\n  meta_tests: 2\n";
        let parsed: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(parsed.utility.timeout_secs, Some(600));

        let disabled: Config = serde_yaml::from_str("utility:\n  timeout_secs: null\n").expect("YAML should parse");
        assert_eq!(disabled.utility.timeout_secs, None);
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "n_iterations: 2\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "n_iterations: 9\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.n_iterations, 9, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.format,
            LogFormat::Json,
            "Base value should persist when not overridden"
        );
    }
}
