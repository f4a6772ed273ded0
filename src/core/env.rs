//! Typed process environment
//!
//! Loads `config.ini` into an immutable [`AppEnv`] record. A missing
//! config file yields the built-in defaults; relative paths resolve
//! against the project root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::audit::types::LogLevel;

/// Environment loading errors
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse {
        /// Path of the config file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
}

/// Typed process configuration, created once at boot and immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct AppEnv {
    /// Database URL (e.g. `sqlite:///qumos.db`).
    pub database_url: String,
    /// Whether to echo SQL statements.
    pub db_echo: bool,
    /// Path to the license file; empty when no license is installed.
    pub license_path: PathBuf,
    /// Path to the public key used for license verification.
    pub public_key_path: PathBuf,
    /// Root directory for feature discovery.
    pub features_root: PathBuf,
    /// Project root directory.
    pub project_root: PathBuf,
    /// Data directory for runtime data.
    pub data_dir: PathBuf,
    /// Default retention in days for audit logs.
    pub global_retention_days: u32,
    /// Minimum audit log level.
    pub min_log_level: LogLevel,
    /// Session timeout in minutes.
    pub session_timeout_minutes: u32,
}

impl AppEnv {
    /// Defaults rooted at the given project directory.
    pub fn with_project_root(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            database_url: "sqlite:///qumos.db".to_string(),
            db_echo: false,
            license_path: PathBuf::new(),
            public_key_path: project_root.join("assets/licensing/public_key.pem"),
            features_root: project_root.clone(),
            data_dir: project_root.join("data"),
            project_root,
            global_retention_days: 365,
            min_log_level: LogLevel::Info,
            session_timeout_minutes: 1440,
        }
    }
}

/// Load configuration from `config.ini`.
///
/// When `config_path` is `None` the loader looks for `config.ini` in
/// the project root. A missing file is not an error; defaults are used.
pub fn load_config(config_path: Option<&Path>, project_root: &Path) -> Result<AppEnv, EnvError> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => project_root.join("config.ini"),
    };

    if !config_file.exists() {
        log::warn!(
            "Config file not found at {}, using defaults",
            config_file.display()
        );
        return Ok(AppEnv::with_project_root(project_root));
    }

    let text = std::fs::read_to_string(&config_file).map_err(|source| EnvError::Io {
        path: config_file.clone(),
        source,
    })?;
    let sections = parse_ini(&text).map_err(|reason| EnvError::Parse {
        path: config_file.clone(),
        reason,
    })?;

    let mut env = AppEnv::with_project_root(project_root);

    if let Some(database) = sections.get("database") {
        if let Some(url) = database.get("url") {
            env.database_url = url.clone();
        }
        if let Some(echo) = database.get("echo") {
            env.db_echo = parse_bool(echo);
        }
    }

    if let Some(licensing) = sections.get("licensing") {
        if let Some(license_path) = licensing.get("license_path") {
            let expanded = expand_env_vars(license_path);
            if !expanded.is_empty() {
                env.license_path = resolve_path(project_root, &expanded);
            }
        }
        if let Some(public_key_path) = licensing.get("public_key_path") {
            let expanded = expand_env_vars(public_key_path);
            if !expanded.is_empty() {
                env.public_key_path = resolve_path(project_root, &expanded);
            }
        }
    }

    if let Some(paths) = sections.get("paths") {
        if let Some(features_root) = paths.get("features_root") {
            env.features_root = resolve_path(project_root, features_root);
        }
        if let Some(data_dir) = paths.get("data_dir") {
            env.data_dir = resolve_path(project_root, data_dir);
        }
    }

    if let Some(audit) = sections.get("audit") {
        if let Some(days) = audit.get("global_retention_days") {
            match days.parse::<u32>() {
                Ok(parsed) if parsed > 0 => env.global_retention_days = parsed,
                _ => log::warn!(
                    "Invalid global_retention_days `{}`, keeping default {}",
                    days,
                    env.global_retention_days
                ),
            }
        }
        if let Some(level) = audit.get("min_log_level") {
            match level.parse::<LogLevel>() {
                Ok(parsed) => env.min_log_level = parsed,
                Err(_) => log::warn!(
                    "Invalid min_log_level `{}`, keeping default {}",
                    level,
                    env.min_log_level
                ),
            }
        }
    }

    if let Some(session) = sections.get("session") {
        if let Some(timeout) = session.get("timeout_minutes") {
            match timeout.parse::<u32>() {
                Ok(parsed) => env.session_timeout_minutes = parsed,
                Err(_) => log::warn!(
                    "Invalid session timeout_minutes `{}`, keeping default {}",
                    timeout,
                    env.session_timeout_minutes
                ),
            }
        }
    }

    log::info!("Loaded config from {}", config_file.display());
    Ok(env)
}

/// Parse INI-style text into `section -> key -> value`.
///
/// Supports `[section]` headers, `key = value` pairs and `;`/`#`
/// comment lines. Keys outside any section are rejected.
fn parse_ini(text: &str) -> Result<HashMap<String, HashMap<String, String>>, String> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for (number, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_ascii_lowercase();
            if name.is_empty() {
                return Err(format!("empty section header at line {}", number + 1));
            }
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(format!(
                "line {} is neither a section header nor a key=value pair",
                number + 1
            ));
        };
        let Some(section) = current.as_ref() else {
            return Err(format!("key `{}` outside any section at line {}", key.trim(), number + 1));
        };

        sections
            .get_mut(section)
            .expect("current section always inserted")
            .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(sections)
}

/// Expand `%VAR%` and `${VAR}` placeholders from the process
/// environment. Unknown variables are left untouched.
fn expand_env_vars(raw: &str) -> String {
    let mut result = raw.to_string();
    for (key, value) in std::env::vars() {
        result = result.replace(&format!("%{key}%"), &value);
        result = result.replace(&format!("${{{key}}}"), &value);
    }
    result
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn resolve_path(project_root: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_project(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qumos_env_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let root = temp_project("defaults");
        let env = load_config(None, &root).unwrap();

        assert_eq!(env.database_url, "sqlite:///qumos.db");
        assert_eq!(env.features_root, root);
        assert_eq!(env.global_retention_days, 365);
        assert_eq!(env.min_log_level, LogLevel::Info);
        assert_eq!(env.session_timeout_minutes, 1440);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_sections_override_defaults() {
        let root = temp_project("sections");
        std::fs::write(
            root.join("config.ini"),
            "[database]\n\
             url = sqlite:///:memory:\n\
             echo = true\n\
             \n\
             [paths]\n\
             features_root = features\n\
             data_dir = var/data\n\
             \n\
             [audit]\n\
             global_retention_days = 730\n\
             min_log_level = WARNING\n\
             \n\
             [session]\n\
             timeout_minutes = 30\n",
        )
        .unwrap();

        let env = load_config(None, &root).unwrap();
        assert_eq!(env.database_url, "sqlite:///:memory:");
        assert!(env.db_echo);
        assert_eq!(env.features_root, root.join("features"));
        assert_eq!(env.data_dir, root.join("var/data"));
        assert_eq!(env.global_retention_days, 730);
        assert_eq!(env.min_log_level, LogLevel::Warning);
        assert_eq!(env.session_timeout_minutes, 30);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_env_var_expansion_in_license_path() {
        let root = temp_project("expansion");
        std::env::set_var("QUMOS_TEST_LICENSE_DIR", "/opt/licenses");
        std::fs::write(
            root.join("config.ini"),
            "[licensing]\nlicense_path = %QUMOS_TEST_LICENSE_DIR%/qumos.lic\n",
        )
        .unwrap();

        let env = load_config(None, &root).unwrap();
        assert_eq!(env.license_path, PathBuf::from("/opt/licenses/qumos.lic"));

        std::env::remove_var("QUMOS_TEST_LICENSE_DIR");
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_malformed_line_is_a_parse_error() {
        let root = temp_project("malformed");
        std::fs::write(root.join("config.ini"), "[database]\nnot a pair\n").unwrap();

        let err = load_config(None, &root).unwrap_err();
        assert!(matches!(err, EnvError::Parse { .. }));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_invalid_level_keeps_default() {
        let root = temp_project("badlevel");
        std::fs::write(root.join("config.ini"), "[audit]\nmin_log_level = LOUD\n").unwrap();

        let env = load_config(None, &root).unwrap();
        assert_eq!(env.min_log_level, LogLevel::Info);

        std::fs::remove_dir_all(&root).ok();
    }
}
