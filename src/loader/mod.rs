//! Composition root
//!
//! The loader builds the process's object graph: it loads the typed
//! environment, registers infrastructure singletons, discovers feature
//! descriptors, computes the boot order and registers every feature
//! into the service container, refusing to finish unless the audit
//! sink is resolvable.

pub mod boot;
pub mod contracts;
pub mod module;

use thiserror::Error;

pub use boot::Loader;
pub use module::{builtin_modules, FeatureModule};

use crate::configurator::ConfigError;
use crate::core::container::ContainerError;
use crate::core::env::EnvError;

/// Well-known container keys. Opaque strings, but stable across
/// releases.
pub mod keys {
    /// The typed process environment.
    pub const ENV: &str = "env";
    /// The database service.
    pub const DATABASE_SERVICE: &str = "database.service";
    /// The configurator service.
    pub const CONFIGURATOR_SERVICE: &str = "configurator.service";
    /// The licensing service.
    pub const LICENSING_SERVICE: &str = "licensing.service";
    /// The audit service.
    pub const AUDIT_SERVICE: &str = "audit.service";
    /// Alias of the audit service; mandatory for boot completion.
    pub const AUDIT_SINK: &str = "audit.sink";
    /// The authenticator service.
    pub const AUTH_SERVICE: &str = "auth.service";
    /// The user-management service.
    pub const USER_SERVICE: &str = "user.service";
    /// The user repository.
    pub const USER_REPOSITORY: &str = "user.repository";
    /// The translation service.
    pub const TRANSLATION_SERVICE: &str = "translation.service";
}

/// Loader errors
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Audit sink is not available: {0}")]
    AuditSinkNotAvailable(String),

    #[error("Failed to load feature `{feature_id}`: {reason}")]
    FeatureLoad {
        /// Feature that failed to register.
        feature_id: String,
        /// Why it failed.
        reason: String,
    },

    #[error("Feature `{feature_id}` depends on `{missing}` which is not available")]
    Dependency {
        /// Feature declaring the dependency.
        feature_id: String,
        /// The unavailable dependency.
        missing: String,
    },

    #[error("Cyclic dependency among features: {remaining:?}")]
    CyclicDependency {
        /// Features that could not be ordered.
        remaining: Vec<String>,
    },

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Result type for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;
