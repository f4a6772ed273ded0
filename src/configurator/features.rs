//! Feature repository
//!
//! Discovery, loading and validation of `<feature_id>/meta.json`, one
//! directory level below the features root. Enforces the convention
//! that the descriptor id equals the folder name, case-sensitively.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;

use crate::audit::types::LogLevel;

use super::descriptor::{AuditConfig, FeatureDescriptor, LicensingConfig};
use super::{ConfigError, ConfigResult};

/// Folders that are never feature candidates.
const IGNORE_FOLDERS: &[&str] = &[
    "build", "cache", "config", "data", "dist", "docs", "node_modules", "target", "temp", "tests",
    "venv", "shared",
];

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("version pattern is valid"));

/// Discovery, loading and caching of feature descriptors.
///
/// In strict mode the first invalid descriptor aborts a discovery
/// pass; in lenient mode invalid descriptors are logged and skipped.
pub struct FeatureRepository {
    features_root: PathBuf,
    strict_mode: bool,
    cache: RwLock<HashMap<String, FeatureDescriptor>>,
}

impl FeatureRepository {
    /// Repository over `features_root`, in strict mode.
    pub fn new(features_root: impl Into<PathBuf>) -> Self {
        let features_root = features_root.into();
        log::info!(
            "FeatureRepository initialized with root: {}",
            features_root.display()
        );
        Self {
            features_root,
            strict_mode: true,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Switch between strict and lenient validation.
    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }

    /// Scan one level below the features root for feature folders with
    /// a `meta.json`, validating each descriptor.
    ///
    /// A successful pass replaces the cache entry for every found id.
    pub fn discover_all(&self) -> ConfigResult<Vec<FeatureDescriptor>> {
        if !self.features_root.is_dir() {
            log::warn!(
                "Features root does not exist: {}",
                self.features_root.display()
            );
            return Ok(Vec::new());
        }

        let mut folders: Vec<PathBuf> = std::fs::read_dir(&self.features_root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        folders.sort();

        let mut descriptors = Vec::new();
        for folder in folders {
            let Some(folder_name) = folder.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_ignored(folder_name) {
                continue;
            }

            let meta_path = folder.join("meta.json");
            if !meta_path.exists() {
                continue;
            }

            match self.load_and_validate(&meta_path, folder_name) {
                Ok(descriptor) => {
                    self.cache
                        .write()
                        .insert(descriptor.id.clone(), descriptor.clone());
                    descriptors.push(descriptor);
                }
                Err(e) => {
                    log::error!("Invalid meta.json in {}: {}", folder_name, e);
                    if self.strict_mode {
                        return Err(e);
                    }
                }
            }
        }

        Ok(descriptors)
    }

    /// Load the descriptor for one feature, consulting the cache
    /// first. A missing folder or `meta.json` fails with
    /// [`ConfigError::FeatureNotFound`].
    pub fn get_by_id(&self, feature_id: &str) -> ConfigResult<FeatureDescriptor> {
        if let Some(descriptor) = self.cache.read().get(feature_id) {
            return Ok(descriptor.clone());
        }

        let meta_path = self.features_root.join(feature_id).join("meta.json");
        if !meta_path.exists() {
            return Err(ConfigError::FeatureNotFound(feature_id.to_string()));
        }

        let descriptor = self.load_and_validate(&meta_path, feature_id)?;
        self.cache
            .write()
            .insert(descriptor.id.clone(), descriptor.clone());
        Ok(descriptor)
    }

    /// Validate a single feature's descriptor.
    pub fn validate(&self, feature_id: &str) -> ConfigResult<bool> {
        self.get_by_id(feature_id).map(|_| true)
    }

    fn load_and_validate(
        &self,
        meta_path: &Path,
        folder_name: &str,
    ) -> ConfigResult<FeatureDescriptor> {
        let text = std::fs::read_to_string(meta_path)?;
        let raw: Value = serde_json::from_str(&text).map_err(|e| ConfigError::InvalidMeta {
            feature_id: folder_name.to_string(),
            reason: format!("JSON parsing failed: {e}"),
        })?;

        let Value::Object(raw) = raw else {
            return Err(invalid(folder_name, "meta.json root must be a JSON object"));
        };

        // Required fields.
        let id = required_string(&raw, "id", folder_name)?;
        let label = required_string(&raw, "label", folder_name)?;
        let version = required_string(&raw, "version", folder_name)?;
        let main_class = required_string(&raw, "main_class", folder_name)?;

        if id != folder_name {
            return Err(invalid(
                folder_name,
                &format!(
                    "id `{id}` must match the folder name `{folder_name}` (case-sensitive)"
                ),
            ));
        }

        if !VERSION_PATTERN.is_match(&version) {
            return Err(invalid(
                folder_name,
                &format!("version must follow semantic versioning (X.Y.Z), got '{version}'"),
            ));
        }

        // Optional fields with shape checks.
        let visible_for = optional_string_array(&raw, "visible_for", folder_name)?;
        let dependencies = optional_string_array(&raw, "dependencies", folder_name)?;
        let is_core = optional_bool(&raw, "is_core", false, folder_name)?;
        let requires_login = optional_bool(&raw, "requires_login", true, folder_name)?;
        let sort_order = optional_sort_order(&raw, folder_name)?;
        let audit = parse_audit(raw.get("audit"), folder_name)?;
        let licensing = parse_licensing(raw.get("licensing"), folder_name)?;
        let description = optional_string(&raw, "description");
        let icon = optional_string(&raw, "icon");

        Ok(FeatureDescriptor {
            id,
            label,
            version,
            main_class,
            visible_for,
            is_core,
            sort_order,
            requires_login,
            dependencies,
            audit,
            licensing,
            description,
            icon,
        })
    }
}

fn is_ignored(folder_name: &str) -> bool {
    folder_name.starts_with('.')
        || folder_name == "__pycache__"
        || IGNORE_FOLDERS.contains(&folder_name)
}

fn invalid(feature_id: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidMeta {
        feature_id: feature_id.to_string(),
        reason: reason.to_string(),
    }
}

fn required_string(
    raw: &serde_json::Map<String, Value>,
    field: &str,
    feature_id: &str,
) -> ConfigResult<String> {
    match raw.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(invalid(
            feature_id,
            &format!("missing required field: {field}"),
        )),
    }
}

fn optional_string(raw: &serde_json::Map<String, Value>, field: &str) -> Option<String> {
    raw.get(field).and_then(Value::as_str).map(String::from)
}

fn optional_string_array(
    raw: &serde_json::Map<String, Value>,
    field: &str,
    feature_id: &str,
) -> ConfigResult<Vec<String>> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => values.push(s.to_string()),
                    None => {
                        return Err(invalid(
                            feature_id,
                            &format!("{field} must be a list of strings"),
                        ))
                    }
                }
            }
            Ok(values)
        }
        Some(_) => Err(invalid(feature_id, &format!("{field} must be a list"))),
    }
}

fn optional_bool(
    raw: &serde_json::Map<String, Value>,
    field: &str,
    default: bool,
    feature_id: &str,
) -> ConfigResult<bool> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(invalid(feature_id, &format!("{field} must be a boolean"))),
    }
}

fn optional_sort_order(
    raw: &serde_json::Map<String, Value>,
    feature_id: &str,
) -> ConfigResult<u32> {
    match raw.get("sort_order") {
        None | Some(Value::Null) => Ok(999),
        Some(value) => match value.as_u64() {
            Some(n) if n <= u64::from(u32::MAX) => Ok(n as u32),
            _ => Err(invalid(
                feature_id,
                &format!("sort_order must be a non-negative integer, got {value}"),
            )),
        },
    }
}

fn parse_audit(raw: Option<&Value>, feature_id: &str) -> ConfigResult<Option<AuditConfig>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Value::Object(audit) = raw else {
        return Err(invalid(feature_id, "audit must be an object"));
    };

    let must_audit = optional_bool(audit, "must_audit", false, feature_id)
        .map_err(|_| invalid(feature_id, "audit.must_audit must be a boolean"))?;

    let min_log_level = match audit.get("min_log_level") {
        None | Some(Value::Null) => LogLevel::Info,
        Some(Value::String(s)) => s.parse::<LogLevel>().map_err(|_| {
            invalid(
                feature_id,
                &format!(
                    "audit.min_log_level must be one of DEBUG|INFO|WARNING|ERROR|CRITICAL, got '{s}'"
                ),
            )
        })?,
        Some(other) => {
            return Err(invalid(
                feature_id,
                &format!("audit.min_log_level must be a string, got {other}"),
            ))
        }
    };

    let critical_actions = optional_string_array(audit, "critical_actions", feature_id)
        .map_err(|_| invalid(feature_id, "audit.critical_actions must be a list"))?;

    let retention_days = match audit.get("retention_days") {
        None | Some(Value::Null) => 365,
        Some(value) => match value.as_u64() {
            Some(n) if n > 0 && n <= u64::from(u32::MAX) => n as u32,
            _ => {
                return Err(invalid(
                    feature_id,
                    &format!("audit.retention_days must be a positive integer, got {value}"),
                ))
            }
        },
    };

    Ok(Some(AuditConfig {
        must_audit,
        min_log_level,
        critical_actions,
        retention_days,
    }))
}

fn parse_licensing(raw: Option<&Value>, feature_id: &str) -> ConfigResult<Option<LicensingConfig>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Value::Object(licensing) = raw else {
        return Err(invalid(feature_id, "licensing must be an object"));
    };

    let requires_license = optional_bool(licensing, "requires_license", false, feature_id)
        .map_err(|_| invalid(feature_id, "licensing.requires_license must be a boolean"))?;

    let feature_code = match licensing.get("feature_code") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(invalid(
                feature_id,
                &format!("licensing.feature_code must be a string, got {other}"),
            ))
        }
    };

    Ok(Some(LicensingConfig {
        requires_license,
        feature_code,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn features_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "qumos_features_{}_{}_{}",
            name,
            std::process::id(),
            DIR_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_meta(root: &Path, folder: &str, meta: &str) {
        let dir = root.join(folder);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("meta.json"), meta).unwrap();
    }

    fn minimal_meta(id: &str) -> String {
        format!(
            r#"{{"id": "{id}", "label": "{id}", "version": "1.0.0", "main_class": "{id}.Service"}}"#
        )
    }

    #[test]
    fn test_discovery_finds_valid_features() {
        let root = features_root("valid");
        write_meta(&root, "audittrail", &minimal_meta("audittrail"));
        write_meta(&root, "authenticator", &minimal_meta("authenticator"));
        std::fs::create_dir_all(root.join("no_meta_here")).unwrap();
        write_meta(&root, "data", &minimal_meta("data")); // ignored folder

        let repo = FeatureRepository::new(&root);
        let found = repo.discover_all().unwrap();
        let ids: Vec<&str> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["audittrail", "authenticator"]);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_id_must_match_folder_name() {
        let root = features_root("mismatch");
        write_meta(&root, "auth", &minimal_meta("Auth"));

        let repo = FeatureRepository::new(&root);
        let err = repo.discover_all().unwrap_err();
        match err {
            ConfigError::InvalidMeta { feature_id, reason } => {
                assert_eq!(feature_id, "auth");
                assert!(reason.contains("id"));
                assert!(reason.contains("folder name"));
            }
            other => panic!("expected InvalidMeta, got {other:?}"),
        }

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_version_must_be_semantic() {
        let root = features_root("version");
        write_meta(
            &root,
            "feat",
            r#"{"id": "feat", "label": "Feat", "version": "1.0", "main_class": "feat.S"}"#,
        );

        let repo = FeatureRepository::new(&root);
        let err = repo.discover_all().unwrap_err();
        match err {
            ConfigError::InvalidMeta { reason, .. } => {
                assert!(reason.contains("semantic versioning"));
            }
            other => panic!("expected InvalidMeta, got {other:?}"),
        }

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_lenient_mode_skips_invalid_descriptors() {
        let root = features_root("lenient");
        write_meta(&root, "good", &minimal_meta("good"));
        write_meta(&root, "bad", r#"{"id": "bad"}"#);

        let repo = FeatureRepository::new(&root).with_strict_mode(false);
        let found = repo.discover_all().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "good");

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_full_descriptor_parsing() {
        let root = features_root("full");
        write_meta(
            &root,
            "user_management",
            r#"{
                "id": "user_management",
                "label": "User Management",
                "version": "2.1.0",
                "main_class": "user_management.UserManagementService",
                "visible_for": ["ADMIN", "QMB"],
                "is_core": false,
                "sort_order": 20,
                "requires_login": true,
                "dependencies": ["audittrail"],
                "audit": {
                    "must_audit": true,
                    "min_log_level": "WARNING",
                    "critical_actions": ["DELETE_USER"],
                    "retention_days": 730
                },
                "licensing": {
                    "requires_license": true,
                    "feature_code": "user_management"
                },
                "description": "Manage users and roles",
                "icon": "users.svg"
            }"#,
        );

        let repo = FeatureRepository::new(&root);
        let descriptor = repo.get_by_id("user_management").unwrap();
        assert_eq!(descriptor.sort_order, 20);
        assert_eq!(descriptor.dependencies, vec!["audittrail"]);
        let audit = descriptor.audit.unwrap();
        assert!(audit.must_audit);
        assert_eq!(audit.min_log_level, LogLevel::Warning);
        assert_eq!(audit.retention_days, 730);
        let licensing = descriptor.licensing.unwrap();
        assert!(licensing.requires_license);
        assert_eq!(licensing.feature_code.as_deref(), Some("user_management"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_audit_block_shape_is_validated() {
        let root = features_root("audit_shape");
        write_meta(
            &root,
            "feat",
            r#"{"id": "feat", "label": "F", "version": "1.0.0", "main_class": "f.S",
                "audit": {"retention_days": 0}}"#,
        );

        let repo = FeatureRepository::new(&root);
        let err = repo.get_by_id("feat").unwrap_err();
        match err {
            ConfigError::InvalidMeta { reason, .. } => {
                assert!(reason.contains("retention_days"));
            }
            other => panic!("expected InvalidMeta, got {other:?}"),
        }

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_get_by_id_unknown_feature() {
        let root = features_root("unknown");
        let repo = FeatureRepository::new(&root);
        let err = repo.get_by_id("ghost").unwrap_err();
        assert!(matches!(err, ConfigError::FeatureNotFound(id) if id == "ghost"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_cache_serves_repeat_lookups() {
        let root = features_root("cache");
        write_meta(&root, "feat", &minimal_meta("feat"));

        let repo = FeatureRepository::new(&root);
        let first = repo.get_by_id("feat").unwrap();

        // Remove the folder; the cached descriptor still answers.
        std::fs::remove_dir_all(root.join("feat")).unwrap();
        let second = repo.get_by_id("feat").unwrap();
        assert_eq!(first, second);

        std::fs::remove_dir_all(&root).ok();
    }
}
