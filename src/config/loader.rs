//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Files are optional;
//! an absent file simply leaves the defaults in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File};
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::MigrationsConfig;

/// Base name of the configuration files
const CONFIG_FILE_STEM: &str = "batched_migrations";

/// Prefix of environment overrides, e.g. `BBM__ENGINE__STRICT_MODE=true`
const ENV_PREFIX: &str = "BBM";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: MigrationsConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(None, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let explicit = config_dir.is_some();
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        if explicit && !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading batched migration configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        debug!(
            minimum_interval_seconds = config.engine.minimum_interval_seconds,
            max_batch_attempts = config.engine.max_batch_attempts,
            strict_mode = config.engine.strict_mode,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<MigrationsConfig> {
        let base = config_directory.join(format!("{CONFIG_FILE_STEM}.toml"));
        let overrides = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.toml"));

        let settings = Config::builder()
            .add_source(File::from(base).required(false))
            .add_source(File::from(overrides).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize::<MigrationsConfig>()?)
    }

    /// Detect the environment from `BBM_ENV`
    pub fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &MigrationsConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().engine.default_batch_size, 1_000);
        assert_eq!(manager.config().engine.minimum_interval_seconds, 120);
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("batched_migrations.toml"),
            "[engine]\nmax_batch_attempts = 5\nstrict_mode = false\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("batched_migrations.test.toml"),
            "[engine]\nstrict_mode = true\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        assert_eq!(manager.config().engine.max_batch_attempts, 5);
        assert!(manager.config().engine.strict_mode);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("batched_migrations.toml"),
            "[engine]\nminimum_interval_seconds = 0\n",
        )
        .unwrap();

        let err =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_explicit_missing_directory_is_an_error() {
        let err = ConfigManager::load_from_directory_with_env(
            Some(PathBuf::from("/definitely/not/here")),
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DirectoryNotFound { .. }));
    }
}
