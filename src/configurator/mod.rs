//! Feature discovery and configuration
//!
//! Scans the features root for `meta.json` descriptors, validates the
//! descriptor conventions, loads the global app config and exposes
//! both through the configurator service.

pub mod app_config;
pub mod descriptor;
pub mod features;
pub mod service;

use thiserror::Error;

pub use app_config::{AppConfig, ConfigRepository};
pub use descriptor::{
    AuditConfig, FeatureDescriptor, FeatureRegistryEntry, FeatureStatus, LicensingConfig,
};
pub use features::FeatureRepository;
pub use service::ConfiguratorService;

/// Descriptor and configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Invalid meta.json for feature `{feature_id}`: {reason}")]
    InvalidMeta {
        /// Feature (folder) the descriptor belongs to.
        feature_id: String,
        /// What was wrong with it.
        reason: String,
    },

    #[error("Invalid app config value for `{field}` (got {value}): {reason}")]
    ConfigValidation {
        /// Offending config field.
        field: String,
        /// The rejected value, rendered.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configurator operations
pub type ConfigResult<T> = Result<T, ConfigError>;
