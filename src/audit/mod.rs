//! Audit trail
//!
//! Structured, persisted audit logging with level gating, role-scoped
//! queries, retention cleanup and JSON/CSV export. The service behind
//! `audit.service` (and its `audit.sink` alias) is mandatory: the
//! loader refuses to boot without it.

pub mod policy;
pub mod repository;
pub mod service;
pub mod types;

use thiserror::Error;

pub use policy::AuditPolicy;
pub use repository::AuditRepository;
pub use service::AuditService;
pub use types::{AuditLog, AuditLogFilter, CreateAuditLog, LogLevel, Severity};

/// Audit errors
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("User {user_id} may not read audit logs with filter {filter}")]
    AccessDenied {
        /// Caller whose access was denied.
        user_id: i64,
        /// Human-readable rendering of the rejected filter.
        filter: String,
    },

    #[error("Invalid audit log: {reason}")]
    InvalidLog {
        /// Which validation rules failed.
        reason: String,
    },

    #[error("Invalid export format: {0} (allowed: json, csv)")]
    ExportFormat(String),

    #[error("Database failure during {reason}: {source}")]
    Database {
        /// What the repository was doing.
        reason: String,
        /// Underlying SQLite failure.
        #[source]
        source: rusqlite::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),
}

/// Result type for audit operations
pub type AuditResult<T> = Result<T, AuditError>;
