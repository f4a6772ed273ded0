//! Feature descriptors
//!
//! The validated contents of a feature's `meta.json`, plus the
//! registry wrapper handed to UI-level consumers.

use serde::{Deserialize, Serialize};

use crate::audit::types::LogLevel;

/// Audit block of a feature descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether this feature must boot after the audit trail.
    pub must_audit: bool,
    /// Feature-specific minimum log level.
    pub min_log_level: LogLevel,
    /// Actions that are always compliance-critical for this feature.
    pub critical_actions: Vec<String>,
    /// Feature-specific audit retention in days.
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            must_audit: false,
            min_log_level: LogLevel::Info,
            critical_actions: Vec::new(),
            retention_days: 365,
        }
    }
}

/// Licensing block of a feature descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LicensingConfig {
    /// Whether the feature may only register with an entitlement.
    pub requires_license: bool,
    /// Entitlement key, `[a-z0-9_]+`.
    pub feature_code: Option<String>,
}

/// Validated feature description from `<features_root>/<id>/meta.json`.
///
/// Immutable once validated. The `id` always equals the containing
/// folder name, case-sensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    /// Feature id; identical to the folder name.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    /// Semantic version, strictly `X.Y.Z`.
    pub version: String,
    /// Opaque main-class identifier.
    pub main_class: String,
    /// Roles the feature is visible for; empty means everyone.
    pub visible_for: Vec<String>,
    /// Core features are exempt from license gating.
    pub is_core: bool,
    /// Sort order among ready features (lower boots first).
    pub sort_order: u32,
    /// Whether using the feature requires a login.
    pub requires_login: bool,
    /// Ids of features that must boot first.
    pub dependencies: Vec<String>,
    /// Optional audit configuration.
    pub audit: Option<AuditConfig>,
    /// Optional licensing configuration.
    pub licensing: Option<LicensingConfig>,
    /// Optional description text.
    pub description: Option<String>,
    /// Optional icon name or path.
    pub icon: Option<String>,
}

impl FeatureDescriptor {
    /// Whether the feature is visible for `role`.
    ///
    /// An empty `visible_for` set means visible to everyone; the
    /// comparison ignores case.
    pub fn is_visible_for_role(&self, role: &str) -> bool {
        self.visible_for.is_empty()
            || self
                .visible_for
                .iter()
                .any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Whether this feature declares a dependency on `feature_id`.
    pub fn has_dependency(&self, feature_id: &str) -> bool {
        self.dependencies.iter().any(|d| d == feature_id)
    }
}

/// Lifecycle status of a registered feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeatureStatus {
    /// Feature discovered and available.
    Active,
    /// Feature present but administratively disabled.
    Disabled,
}

/// Registry entry wrapping a descriptor for UI-level consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRegistryEntry {
    /// The validated descriptor.
    pub descriptor: FeatureDescriptor,
    /// Current status.
    pub status: FeatureStatus,
}

impl FeatureRegistryEntry {
    /// Wrap a descriptor as an active registry entry.
    pub fn active(descriptor: FeatureDescriptor) -> Self {
        Self {
            descriptor,
            status: FeatureStatus::Active,
        }
    }
}
