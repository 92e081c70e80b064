//! Settings loading and validation.
//!
//! Settings come from the application's YAML config file (the same file that
//! holds `security.encryption_key`) with `VAULT__SECTION__FIELD` environment
//! overrides layered on top.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::keys::DEFAULT_KEY_ENV_VAR;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

const SQLITE_URL_PREFIX: &str = "sqlite:///";

/// Errors produced while loading or interpreting settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Validated settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// File the settings were read from.
    #[serde(skip)]
    source_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite file. Ignored when `connection_string` is set.
    #[serde(default = "default_database_path")]
    pub path: String,

    /// `sqlite:///<path>` URL; takes precedence over `path`.
    #[serde(default)]
    pub connection_string: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecuritySettings {
    /// Environment variable consulted first for the key.
    #[serde(default = "default_key_env_var")]
    pub key_env_var: String,

    /// YAML file holding `security.encryption_key`. Defaults to the settings file itself.
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Generate and persist a key when none is configured.
    #[serde(default = "default_auto_generate_key")]
    pub auto_generate_key: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Tracing log level (e.g. `"info"`, `"debug"`). `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `"pretty"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_database_path() -> String {
    "data/transactions.db".into()
}
fn default_key_env_var() -> String {
    DEFAULT_KEY_ENV_VAR.into()
}
fn default_auto_generate_key() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            connection_string: None,
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            key_env_var: default_key_env_var(),
            key_file: None,
            auto_generate_key: default_auto_generate_key(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            security: SecuritySettings::default(),
            logging: LoggingSettings::default(),
            source_path: PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }
}

impl Settings {
    /// Load settings from `path` (optional; defaults apply if absent) plus
    /// `VAULT__*` environment overrides, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a value is invalid.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let cfg = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("VAULT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = cfg.try_deserialize()?;
        settings.source_path = path.to_path_buf();
        settings.validate()?;
        Ok(settings)
    }

    /// Path the settings were loaded from.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// YAML file the key manager reads and persists the key in.
    pub fn key_file(&self) -> PathBuf {
        self.security
            .key_file
            .clone()
            .unwrap_or_else(|| self.source_path.clone())
    }

    /// Resolve the SQLite database path; relative paths are joined onto `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] for non-SQLite connection strings or
    /// an empty database path.
    pub fn database_path(&self, cwd: &Path) -> Result<PathBuf, SettingsError> {
        let raw = match &self.database.connection_string {
            Some(url) => url.strip_prefix(SQLITE_URL_PREFIX).ok_or_else(|| {
                SettingsError::Invalid(format!(
                    "database.connection_string must start with {SQLITE_URL_PREFIX}"
                ))
            })?,
            None => self.database.path.as_str(),
        };
        if raw.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "SQLite connection string missing database path".into(),
            ));
        }
        let path = PathBuf::from(raw);
        Ok(if path.is_absolute() { path } else { cwd.join(path) })
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<(), SettingsError> {
        ensure_non_empty(&self.security.key_env_var, "security.key_env_var")?;
        ensure_non_empty(&self.logging.level, "logging.level")?;
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(SettingsError::Invalid(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<(), SettingsError> {
    if value.trim().is_empty() {
        return Err(SettingsError::Invalid(format!(
            "{name} is required and must not be empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_database_path(), "data/transactions.db");
        assert_eq!(default_key_env_var(), "FINANCE_APP_ENCRYPTION_KEY");
        assert!(default_auto_generate_key());
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_log_format(), "pretty");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.database.path, "data/transactions.db");
        assert_eq!(settings.key_file(), path);
    }

    #[test]
    fn yaml_values_are_read_and_key_field_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "database:\n  path: ledger.db\nsecurity:\n  encryption_key: whatever\n  auto_generate_key: false\nlogging:\n  format: json\n",
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.database.path, "ledger.db");
        assert!(!settings.security.auto_generate_key);
        assert_eq!(settings.logging.format, "json");
    }

    #[test]
    fn connection_string_wins_over_path() {
        let mut settings = Settings::default();
        settings.database.connection_string = Some("sqlite:////var/lib/finance/tx.db".into());
        let path = settings.database_path(Path::new("/work")).unwrap();
        assert_eq!(path, PathBuf::from("/var/lib/finance/tx.db"));
    }

    #[test]
    fn relative_path_is_joined_to_cwd() {
        let settings = Settings::default();
        let path = settings.database_path(Path::new("/work")).unwrap();
        assert_eq!(path, PathBuf::from("/work/data/transactions.db"));
    }

    #[test]
    fn non_sqlite_connection_string_rejected() {
        let mut settings = Settings::default();
        settings.database.connection_string = Some("postgresql://db/finance".into());
        assert!(settings.database_path(Path::new("/work")).is_err());
    }

    #[test]
    fn empty_sqlite_path_rejected() {
        let mut settings = Settings::default();
        settings.database.connection_string = Some("sqlite:///".into());
        assert!(settings.database_path(Path::new("/work")).is_err());
    }

    #[test]
    fn validate_rejects_unknown_log_format() {
        let mut settings = Settings::default();
        settings.logging.format = "xml".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_env_var_name() {
        let mut settings = Settings::default();
        settings.security.key_env_var = "  ".into();
        assert!(settings.validate().is_err());
    }
}
