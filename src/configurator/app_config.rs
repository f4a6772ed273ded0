//! App-level configuration
//!
//! Read-only global configuration from `<project>/config/app_config.json`.
//! A missing file or missing keys fall back to built-in defaults; strict
//! mode surfaces parse and type failures as `ConfigValidation` errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::types::LogLevel;

use super::{ConfigError, ConfigResult};

/// `[database]` section of the app config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database URL.
    pub url: String,
    /// Whether to echo SQL statements.
    pub echo: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite:///qumos.db".to_string(),
            echo: false,
        }
    }
}

/// `[audit]` section of the app config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Default audit retention in days.
    pub global_retention_days: u32,
    /// Default minimum audit log level.
    pub min_log_level: LogLevel,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            global_retention_days: 365,
            min_log_level: LogLevel::Info,
        }
    }
}

/// `[session]` section of the app config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Session timeout in minutes.
    pub timeout_minutes: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_minutes: 1440,
        }
    }
}

/// `[paths]` section of the app config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Root directory for feature discovery.
    pub features_root: PathBuf,
    /// Data directory for runtime data.
    pub data_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            features_root: PathBuf::from("."),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Global application configuration, app-level counterpart of the
/// process environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database settings.
    pub database: DatabaseSettings,
    /// Audit defaults.
    pub audit: AuditSettings,
    /// Session settings.
    pub session: SessionSettings,
    /// Path settings.
    pub paths: PathSettings,
}

/// Read-only repository for the app config file.
pub struct ConfigRepository {
    project_root: PathBuf,
}

impl ConfigRepository {
    /// Repository rooted at the project directory.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        log::info!(
            "ConfigRepository initialized with root: {}",
            project_root.display()
        );
        Self { project_root }
    }

    /// Load `config/app_config.json`.
    ///
    /// In lenient mode (`strict = false`) every failure falls back to
    /// defaults with a warning; in strict mode parse or type failures
    /// are surfaced as [`ConfigError::ConfigValidation`].
    pub fn load_app_config(&self, strict: bool) -> ConfigResult<AppConfig> {
        let config_path = self.project_root.join("config").join("app_config.json");

        if !config_path.exists() {
            log::info!("No app_config.json found, using defaults");
            return Ok(AppConfig::default());
        }

        let text = match std::fs::read_to_string(&config_path) {
            Ok(text) => text,
            Err(e) => {
                if strict {
                    return Err(ConfigError::ConfigValidation {
                        field: "app_config.json".to_string(),
                        value: config_path.display().to_string(),
                        reason: format!("file read error: {e}"),
                    });
                }
                log::error!("Error reading app_config.json: {e}, using defaults");
                return Ok(AppConfig::default());
            }
        };

        let raw: Value = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(e) => {
                if strict {
                    return Err(ConfigError::ConfigValidation {
                        field: "app_config.json".to_string(),
                        value: String::new(),
                        reason: format!("JSON parsing failed: {e}"),
                    });
                }
                log::error!("Invalid JSON in app_config.json: {e}, using defaults");
                return Ok(AppConfig::default());
            }
        };

        let Value::Object(raw) = raw else {
            if strict {
                return Err(ConfigError::ConfigValidation {
                    field: "app_config.json".to_string(),
                    value: raw.to_string(),
                    reason: "root must be a JSON object".to_string(),
                });
            }
            log::warn!("app_config.json root must be a JSON object, using defaults");
            return Ok(AppConfig::default());
        };

        log::info!("Loaded app_config.json from {}", config_path.display());

        let mut config = AppConfig::default();
        let mut reader = SectionReader { strict };

        if let Some(database) = section(&raw, "database") {
            if let Some(url) = reader.string(database, "database.url")? {
                config.database.url = url;
            }
            if let Some(echo) = reader.bool(database, "database.echo")? {
                config.database.echo = echo;
            }
        }

        if let Some(audit) = section(&raw, "audit") {
            if let Some(days) = reader.positive_int(audit, "audit.global_retention_days")? {
                config.audit.global_retention_days = days;
            }
            if let Some(level) = reader.log_level(audit, "audit.min_log_level")? {
                config.audit.min_log_level = level;
            }
        }

        if let Some(session) = section(&raw, "session") {
            if let Some(timeout) = reader.positive_int(session, "session.timeout_minutes")? {
                config.session.timeout_minutes = timeout;
            }
        }

        if let Some(paths) = section(&raw, "paths") {
            if let Some(features_root) = reader.string(paths, "paths.features_root")? {
                config.paths.features_root = PathBuf::from(features_root);
            }
            if let Some(data_dir) = reader.string(paths, "paths.data_dir")? {
                config.paths.data_dir = PathBuf::from(data_dir);
            }
        }

        Ok(config)
    }
}

fn section<'a>(
    raw: &'a serde_json::Map<String, Value>,
    name: &str,
) -> Option<&'a serde_json::Map<String, Value>> {
    raw.get(name).and_then(Value::as_object)
}

/// Reads typed values out of a config section, either failing or
/// warning on type mismatches depending on the mode.
struct SectionReader {
    strict: bool,
}

impl SectionReader {
    fn string(
        &mut self,
        section: &serde_json::Map<String, Value>,
        field: &str,
    ) -> ConfigResult<Option<String>> {
        let key = field.rsplit('.').next().unwrap_or(field);
        match section.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => self.mismatch(field, other, "expected a string"),
        }
    }

    fn bool(
        &mut self,
        section: &serde_json::Map<String, Value>,
        field: &str,
    ) -> ConfigResult<Option<bool>> {
        let key = field.rsplit('.').next().unwrap_or(field);
        match section.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => self.mismatch(field, other, "expected a boolean"),
        }
    }

    fn positive_int(
        &mut self,
        section: &serde_json::Map<String, Value>,
        field: &str,
    ) -> ConfigResult<Option<u32>> {
        let key = field.rsplit('.').next().unwrap_or(field);
        match section.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => match value.as_u64() {
                Some(n) if n > 0 && n <= u64::from(u32::MAX) => Ok(Some(n as u32)),
                _ => self.mismatch(field, value, "expected a positive integer"),
            },
        }
    }

    fn log_level(
        &mut self,
        section: &serde_json::Map<String, Value>,
        field: &str,
    ) -> ConfigResult<Option<LogLevel>> {
        let key = field.rsplit('.').next().unwrap_or(field);
        match section.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => match s.parse::<LogLevel>() {
                Ok(level) => Ok(Some(level)),
                Err(_) => self.mismatch(
                    field,
                    &Value::String(s.clone()),
                    "expected one of DEBUG|INFO|WARNING|ERROR|CRITICAL",
                ),
            },
            Some(other) => self.mismatch(field, other, "expected a log level string"),
        }
    }

    fn mismatch<T>(&self, field: &str, value: &Value, reason: &str) -> ConfigResult<Option<T>> {
        if self.strict {
            Err(ConfigError::ConfigValidation {
                field: field.to_string(),
                value: value.to_string(),
                reason: reason.to_string(),
            })
        } else {
            log::warn!(
                "Ignoring app config value for {} ({}): {}",
                field,
                value,
                reason
            );
            Ok(None)
        }
    }
}
