//! Audit log types
//!
//! Log levels, severities and the DTOs moving through the audit
//! pipeline: the builder-style input record, the immutable persisted
//! log and the composable query filter.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Log level for structured application logging.
///
/// Ordering matters: the level gate admits a record only when its
/// level is at least the effective minimum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Detailed developer information
    Debug,
    /// Normal operations
    Info,
    /// Unexpected but non-critical events
    Warning,
    /// Handled errors
    Error,
    /// Severe failures
    Critical,
}

impl LogLevel {
    /// Canonical uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// All known levels, in ascending order.
    pub fn all() -> [LogLevel; 5] {
        [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
        ]
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Compliance severity, independent of [`LogLevel`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Normal audit events
    Info,
    /// Unusual events worth watching
    Warning,
    /// Critical events requiring immediate attention
    Critical,
}

impl Severity {
    /// Canonical uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A persisted audit log entry, immutable after insert.
///
/// Captures the who/when/where/what pattern: user and session, insert
/// timestamp, feature/module/function, action with level, severity and
/// structured details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    /// Monotonic database id.
    pub id: i64,
    /// Wall-clock time at insert.
    pub timestamp: DateTime<Utc>,
    /// Acting user; 0 denotes the system itself.
    pub user_id: i64,
    /// Resolved display name (`SYSTEM` or `user_<id>` when unknown).
    pub username: String,
    /// Feature that produced the record.
    pub feature: String,
    /// Action name.
    pub action: String,
    /// Developer-facing log level.
    pub log_level: LogLevel,
    /// Compliance severity.
    pub severity: Severity,
    /// Source IP, when known.
    pub ip_address: Option<String>,
    /// Session identifier, when known.
    pub session_id: Option<String>,
    /// Source module, when known.
    pub module: Option<String>,
    /// Source function, when known.
    pub function: Option<String>,
    /// Structured, JSON-serializable details.
    #[serde(default)]
    pub details: HashMap<String, Value>,
}

impl AuditLog {
    /// Whether this record carries CRITICAL severity.
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Input record for creating an audit log.
#[derive(Debug, Clone)]
pub struct CreateAuditLog {
    /// Acting user; 0 denotes the system.
    pub user_id: i64,
    /// Feature producing the record.
    pub feature: String,
    /// Action name.
    pub action: String,
    /// Explicit username; synthesized when absent.
    pub username: Option<String>,
    /// Developer-facing log level.
    pub log_level: LogLevel,
    /// Compliance severity.
    pub severity: Severity,
    /// Source IP.
    pub ip_address: Option<String>,
    /// Session identifier.
    pub session_id: Option<String>,
    /// Source module.
    pub module: Option<String>,
    /// Source function.
    pub function: Option<String>,
    /// Structured details.
    pub details: HashMap<String, Value>,
}

impl CreateAuditLog {
    /// Start a record for the given actor, action and feature.
    pub fn new(user_id: i64, action: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            user_id,
            feature: feature.into(),
            action: action.into(),
            username: None,
            log_level: LogLevel::Info,
            severity: Severity::Info,
            ip_address: None,
            session_id: None,
            module: None,
            function: None,
            details: HashMap::new(),
        }
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Set the severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set an explicit username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Add a structured detail.
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Set the source IP address.
    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Set the session identifier.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the source module.
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Set the source function.
    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Validate the record, collecting every violated rule.
    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();

        if self.user_id < 0 {
            errors.push("user_id must be >= 0 (0 = system)".to_string());
        }
        if self.feature.trim().is_empty() {
            errors.push("feature must be a non-empty string".to_string());
        }
        if self.action.trim().is_empty() {
            errors.push("action must be a non-empty string".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    /// Resolve the username, synthesizing `SYSTEM` for user 0 and
    /// `user_<id>` otherwise.
    pub fn resolved_username(&self) -> String {
        match &self.username {
            Some(name) => name.clone(),
            None if self.user_id == 0 => "SYSTEM".to_string(),
            None => format!("user_{}", self.user_id),
        }
    }
}

/// Query filter for audit logs. All criteria compose with AND.
#[derive(Debug, Clone)]
pub struct AuditLogFilter {
    /// Restrict to one user.
    pub user_id: Option<i64>,
    /// Restrict to one feature.
    pub feature: Option<String>,
    /// Restrict to one action.
    pub action: Option<String>,
    /// Restrict to one log level.
    pub log_level: Option<LogLevel>,
    /// Restrict to one severity.
    pub severity: Option<Severity>,
    /// Inclusive lower timestamp bound.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound.
    pub end_date: Option<DateTime<Utc>>,
    /// Maximum number of rows returned.
    pub limit: u32,
    /// Pagination offset.
    pub offset: u32,
}

impl Default for AuditLogFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            feature: None,
            action: None,
            log_level: None,
            severity: None,
            start_date: None,
            end_date: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl AuditLogFilter {
    /// An unconstrained filter with the default limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by user id.
    pub fn user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Filter by feature.
    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    /// Filter by action.
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Filter by log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Filter by severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Filter by inclusive start date.
    pub fn start_date(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    /// Filter by inclusive end date.
    pub fn end_date(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Limit the number of returned rows.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Skip the first `offset` rows.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Whether any criterion beyond pagination is set.
    pub fn has_filters(&self) -> bool {
        self.user_id.is_some()
            || self.feature.is_some()
            || self.action.is_some()
            || self.log_level.is_some()
            || self.severity.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
    }
}

impl fmt::Display for AuditLogFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AuditLogFilter(user_id={:?}, feature={:?}, action={:?}, log_level={:?}, \
             severity={:?}, start_date={:?}, end_date={:?}, limit={}, offset={})",
            self.user_id,
            self.feature,
            self.action,
            self.log_level,
            self.severity,
            self.start_date,
            self.end_date,
            self.limit,
            self.offset
        )
    }
}
