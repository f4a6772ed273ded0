//! Audit service
//!
//! The central audit-trail service: level-gated logging, role-scoped
//! queries, substring search, JSON/CSV export, retention cleanup and
//! per-feature audit configuration sourced from feature descriptors.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::configurator::descriptor::AuditConfig;
use crate::configurator::service::ConfiguratorService;
use crate::configurator::ConfigError;

use super::policy::AuditPolicy;
use super::repository::AuditRepository;
use super::types::{AuditLog, AuditLogFilter, CreateAuditLog, LogLevel, Severity};
use super::{AuditError, AuditResult};

/// Callback invoked after a CRITICAL-severity log is persisted.
pub type CriticalHandler = Box<dyn Fn(&AuditLog) + Send + Sync>;

/// Central audit-trail service.
///
/// All reads go through the access policy with an explicit caller id;
/// writes pass the level gate, are validated, persisted, and may
/// trigger the critical handler.
pub struct AuditService {
    repository: AuditRepository,
    policy: AuditPolicy,
    configurator: Arc<ConfiguratorService>,

    // Level gate: global minimum plus per-feature overrides.
    min_log_level_global: RwLock<LogLevel>,
    min_log_level_per_feature: RwLock<HashMap<String, LogLevel>>,

    // Retention: global default plus per-feature cache from meta.json.
    global_retention_days: u32,
    retention_days: RwLock<HashMap<String, u32>>,

    critical_handler: RwLock<Option<CriticalHandler>>,
}

impl AuditService {
    /// Create the service over its repository, policy and the
    /// configurator used for per-feature audit configuration.
    pub fn new(
        repository: AuditRepository,
        policy: AuditPolicy,
        configurator: Arc<ConfiguratorService>,
        min_log_level: LogLevel,
        global_retention_days: u32,
    ) -> Self {
        Self {
            repository,
            policy,
            configurator,
            min_log_level_global: RwLock::new(min_log_level),
            min_log_level_per_feature: RwLock::new(HashMap::new()),
            global_retention_days,
            retention_days: RwLock::new(HashMap::new()),
            critical_handler: RwLock::new(None),
        }
    }

    /// Record an audit log entry.
    ///
    /// Returns the generated id, or `-1` when the entry is suppressed
    /// by the effective minimum log level (no insert, no side effects).
    pub fn log(&self, entry: CreateAuditLog) -> AuditResult<i64> {
        if !self.should_log(&entry.feature, entry.log_level) {
            return Ok(-1);
        }

        entry
            .validate()
            .map_err(|reason| AuditError::InvalidLog { reason })?;

        let log_id = self.repository.create(&entry)?;

        if entry.severity == Severity::Critical {
            self.handle_critical(&entry, log_id);
        }

        Ok(log_id)
    }

    /// Fetch logs matching `filter` on behalf of `caller`.
    pub fn get_logs(&self, caller: i64, filter: &AuditLogFilter) -> AuditResult<Vec<AuditLog>> {
        self.check_read_access(caller, filter)?;
        self.repository.find_by_filters(filter)
    }

    /// Fetch all logs of one user within an optional time window.
    pub fn get_user_logs(
        &self,
        caller: i64,
        user_id: i64,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> AuditResult<Vec<AuditLog>> {
        let mut filter = AuditLogFilter::new().user_id(user_id);
        filter.start_date = start_date;
        filter.end_date = end_date;

        self.check_read_access(caller, &filter)?;
        self.repository.find_by_filters(&filter)
    }

    /// Fetch all logs of one feature within an optional time window.
    pub fn get_feature_logs(
        &self,
        caller: i64,
        feature: &str,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> AuditResult<Vec<AuditLog>> {
        let mut filter = AuditLogFilter::new().feature(feature);
        filter.start_date = start_date;
        filter.end_date = end_date;

        self.check_read_access(caller, &filter)?;
        self.repository.find_by_filters(&filter)
    }

    /// Substring search over actions and serialized details.
    pub fn search_logs(
        &self,
        caller: i64,
        query: &str,
        filter: Option<AuditLogFilter>,
    ) -> AuditResult<Vec<AuditLog>> {
        let filter = filter.unwrap_or_default();
        self.check_read_access(caller, &filter)?;
        self.repository.search(query, &filter)
    }

    /// Export logs matching `filter` as `json` or `csv`.
    ///
    /// Export always requires system or admin/QMB access, on top of
    /// the read check for the filtered logs.
    pub fn export_logs(
        &self,
        caller: i64,
        filter: &AuditLogFilter,
        format: &str,
    ) -> AuditResult<String> {
        if !self.policy.can_export_logs(caller) {
            return Err(AuditError::AccessDenied {
                user_id: caller,
                filter: filter.to_string(),
            });
        }
        self.check_read_access(caller, filter)?;

        let logs = self.repository.find_by_filters(filter)?;
        match format.to_ascii_lowercase().as_str() {
            "json" => Ok(serde_json::to_string_pretty(&logs)?),
            "csv" => Ok(export_csv(&logs)),
            _ => Err(AuditError::ExportFormat(format.to_string())),
        }
    }

    /// Delete logs older than the effective retention window.
    ///
    /// The window is the explicit argument when given, else the
    /// feature-specific retention from its descriptor, else the global
    /// default. A successful cleanup with at least one deleted row is
    /// recorded as a system audit log (subject to the level gate).
    pub fn delete_old_logs(
        &self,
        feature: Option<&str>,
        retention_days: Option<u32>,
    ) -> AuditResult<u64> {
        let days = match (retention_days, feature) {
            (Some(explicit), _) => explicit,
            (None, Some(feature)) => self.feature_retention_days(feature),
            (None, None) => self.global_retention_days,
        };

        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let deleted = self.repository.delete_before(cutoff, feature)?;

        if deleted > 0 {
            let entry = CreateAuditLog::new(0, "DELETE_OLD_LOGS", "audittrail")
                .detail("deleted_count", deleted)
                .detail(
                    "feature",
                    feature.map(serde_json::Value::from).unwrap_or_default(),
                )
                .detail("retention_days", days)
                .detail("cutoff_date", cutoff.to_rfc3339());
            self.log(entry)?;
        }

        Ok(deleted)
    }

    /// Set the minimum log level, globally or for one feature.
    pub fn set_min_log_level(&self, level: LogLevel, feature: Option<&str>) {
        match feature {
            Some(feature) => {
                self.min_log_level_per_feature
                    .write()
                    .insert(feature.to_string(), level);
                log::info!("Minimum log level for {} set to {}", feature, level);
            }
            None => {
                *self.min_log_level_global.write() = level;
                log::info!("Global minimum log level set to {}", level);
            }
        }
    }

    /// Audit configuration from a feature's descriptor.
    ///
    /// Features without an `audit` block get the defaults; an unknown
    /// feature fails with [`AuditError::FeatureNotFound`].
    pub fn get_feature_audit_config(&self, feature: &str) -> AuditResult<AuditConfig> {
        let meta = self
            .configurator
            .get_feature_meta(feature)
            .map_err(|e| match e {
                ConfigError::FeatureNotFound(id) => AuditError::FeatureNotFound(id),
                other => AuditError::FeatureNotFound(format!("{feature}: {other}")),
            })?;

        Ok(meta.audit.unwrap_or_default())
    }

    /// Replace the CRITICAL-severity handler.
    pub fn set_critical_handler(&self, handler: CriticalHandler) {
        *self.critical_handler.write() = Some(handler);
    }

    /// Single-log lookup by id.
    pub fn get_log(&self, log_id: i64) -> AuditResult<Option<AuditLog>> {
        self.repository.find_by_id(log_id)
    }

    fn check_read_access(&self, caller: i64, filter: &AuditLogFilter) -> AuditResult<()> {
        if self.policy.can_read_logs(caller, filter) {
            Ok(())
        } else {
            Err(AuditError::AccessDenied {
                user_id: caller,
                filter: filter.to_string(),
            })
        }
    }

    fn should_log(&self, feature: &str, level: LogLevel) -> bool {
        let effective = self
            .min_log_level_per_feature
            .read()
            .get(feature)
            .copied()
            .unwrap_or_else(|| *self.min_log_level_global.read());
        level >= effective
    }

    fn handle_critical(&self, entry: &CreateAuditLog, log_id: i64) {
        let record = AuditLog {
            id: log_id,
            timestamp: Utc::now(),
            user_id: entry.user_id,
            username: entry.resolved_username(),
            feature: entry.feature.clone(),
            action: entry.action.clone(),
            log_level: entry.log_level,
            severity: entry.severity,
            ip_address: entry.ip_address.clone(),
            session_id: entry.session_id.clone(),
            module: entry.module.clone(),
            function: entry.function.clone(),
            details: entry.details.clone(),
        };

        if let Some(handler) = self.critical_handler.read().as_ref() {
            handler(&record);
        } else {
            log::warn!(
                "CRITICAL audit event {} ({}) in {} has no handler wired",
                record.action,
                log_id,
                record.feature
            );
        }
    }

    fn feature_retention_days(&self, feature: &str) -> u32 {
        if let Some(days) = self.retention_days.read().get(feature) {
            return *days;
        }

        let days = match self.get_feature_audit_config(feature) {
            Ok(config) => config.retention_days,
            Err(_) => self.global_retention_days,
        };

        self.retention_days
            .write()
            .insert(feature.to_string(), days);
        days
    }
}

/// Render logs as CSV: fixed header, text fields double-quoted with
/// embedded quotes doubled.
fn export_csv(logs: &[AuditLog]) -> String {
    let header = "id,timestamp,user_id,username,feature,action,log_level,severity,\
                  ip_address,session_id,module,function";
    let mut lines = vec![header.to_string()];

    for log in logs {
        lines.push(format!(
            "{},{},{},\"{}\",\"{}\",\"{}\",{},{},\"{}\",\"{}\",\"{}\",\"{}\"",
            log.id,
            log.timestamp.to_rfc3339(),
            log.user_id,
            escape_csv(&log.username),
            escape_csv(&log.feature),
            escape_csv(&log.action),
            log.log_level,
            log.severity,
            escape_csv(log.ip_address.as_deref().unwrap_or("")),
            escape_csv(log.session_id.as_deref().unwrap_or("")),
            escape_csv(log.module.as_deref().unwrap_or("")),
            escape_csv(log.function.as_deref().unwrap_or("")),
        ));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn escape_csv(value: &str) -> String {
    value.replace('"', "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurator::app_config::ConfigRepository;
    use crate::configurator::features::FeatureRepository;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn empty_root(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("qumos_audit_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn service(name: &str) -> AuditService {
        let root = empty_root(name);
        let configurator = Arc::new(ConfiguratorService::new(
            FeatureRepository::new(&root),
            ConfigRepository::new(&root),
        ));
        AuditService::new(
            AuditRepository::new(":memory:").unwrap(),
            AuditPolicy::default(),
            configurator,
            LogLevel::Info,
            365,
        )
    }

    #[test]
    fn test_log_below_minimum_is_suppressed() {
        let service = service("suppressed");
        service.set_min_log_level(LogLevel::Warning, None);

        let id = service
            .log(CreateAuditLog::new(1, "X", "f").log_level(LogLevel::Info))
            .unwrap();
        assert_eq!(id, -1);

        let logs = service
            .get_logs(0, &AuditLogFilter::new().action("X"))
            .unwrap();
        assert!(logs.is_empty());

        let id = service
            .log(CreateAuditLog::new(1, "X", "f").log_level(LogLevel::Error))
            .unwrap();
        assert!(id > 0);
        let logs = service
            .get_logs(0, &AuditLogFilter::new().action("X"))
            .unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn test_per_feature_minimum_overrides_global() {
        let service = service("override");
        service.set_min_log_level(LogLevel::Debug, None);
        service.set_min_log_level(LogLevel::Error, Some("noisy"));

        let suppressed = service
            .log(CreateAuditLog::new(1, "X", "noisy").log_level(LogLevel::Warning))
            .unwrap();
        assert_eq!(suppressed, -1);

        let admitted = service
            .log(CreateAuditLog::new(1, "X", "quiet").log_level(LogLevel::Debug))
            .unwrap();
        assert!(admitted > 0);
    }

    #[test]
    fn test_invalid_log_is_rejected() {
        let service = service("invalid");
        let err = service.log(CreateAuditLog::new(1, "", "f")).unwrap_err();
        assert!(matches!(err, AuditError::InvalidLog { .. }));
    }

    #[test]
    fn test_plain_user_access_is_scoped() {
        let service = service("scoped");
        service
            .log(CreateAuditLog::new(42, "LOGIN", "authenticator"))
            .unwrap();

        // Own logs: fine.
        let own = service
            .get_user_logs(42, 42, None, None)
            .unwrap();
        assert_eq!(own.len(), 1);

        // Someone else's logs: denied.
        let err = service.get_user_logs(42, 99, None, None).unwrap_err();
        assert!(matches!(err, AuditError::AccessDenied { user_id: 42, .. }));

        // Unscoped feature query: denied for plain users.
        let err = service
            .get_feature_logs(42, "authenticator", None, None)
            .unwrap_err();
        assert!(matches!(err, AuditError::AccessDenied { .. }));
    }

    #[test]
    fn test_search_requires_access() {
        let service = service("search");
        service
            .log(CreateAuditLog::new(1, "SIGN_DOCUMENT", "documents").detail("doc", "QM-3"))
            .unwrap();

        let hits = service.search_logs(0, "SIGN", None).unwrap();
        assert_eq!(hits.len(), 1);

        let err = service.search_logs(42, "SIGN", None).unwrap_err();
        assert!(matches!(err, AuditError::AccessDenied { .. }));
    }

    #[test]
    fn test_export_json_round_trips() {
        let service = service("export_json");
        service
            .log(CreateAuditLog::new(3, "LOGIN", "authenticator"))
            .unwrap();

        let json = service
            .export_logs(0, &AuditLogFilter::new(), "json")
            .unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["action"], "LOGIN");
        assert_eq!(parsed[0]["user_id"], 3);
        assert_eq!(parsed[0]["feature"], "authenticator");
    }

    #[test]
    fn test_export_csv_escapes_quotes() {
        let service = service("export_csv");
        service
            .log(CreateAuditLog::new(1, "SAY \"HI\"", "chat"))
            .unwrap();

        let csv = service
            .export_logs(1, &AuditLogFilter::new(), "csv")
            .unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,timestamp,user_id,username,feature,action,log_level,severity,\
             ip_address,session_id,module,function"
        );
        assert!(lines.next().unwrap().contains("\"SAY \"\"HI\"\"\""));
    }

    #[test]
    fn test_export_requires_privilege_and_known_format() {
        let service = service("export_denied");
        let err = service
            .export_logs(42, &AuditLogFilter::new().user_id(42), "json")
            .unwrap_err();
        assert!(matches!(err, AuditError::AccessDenied { .. }));

        let err = service
            .export_logs(0, &AuditLogFilter::new(), "xml")
            .unwrap_err();
        assert!(matches!(err, AuditError::ExportFormat(format) if format == "xml"));
    }

    #[test]
    fn test_delete_old_logs_records_system_entry() {
        let service = service("retention");
        service.log(CreateAuditLog::new(1, "OLD", "f")).unwrap();

        // Retention of zero days puts the cutoff at "now": everything
        // already written is older and gets deleted.
        let deleted = service.delete_old_logs(None, Some(0)).unwrap();
        assert_eq!(deleted, 1);

        let trail = service
            .get_logs(0, &AuditLogFilter::new().action("DELETE_OLD_LOGS"))
            .unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].user_id, 0);
        assert_eq!(trail[0].username, "SYSTEM");
        assert_eq!(trail[0].feature, "audittrail");
        assert_eq!(trail[0].details.get("deleted_count"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_delete_with_no_matches_stays_silent() {
        let service = service("retention_silent");
        let deleted = service.delete_old_logs(None, Some(30)).unwrap();
        assert_eq!(deleted, 0);

        let trail = service
            .get_logs(0, &AuditLogFilter::new().action("DELETE_OLD_LOGS"))
            .unwrap();
        assert!(trail.is_empty());
    }

    #[test]
    fn test_critical_handler_fires() {
        let service = service("critical");
        let calls = Arc::new(AtomicUsize::new(0));

        let handler_calls = calls.clone();
        service.set_critical_handler(Box::new(move |record| {
            assert_eq!(record.action, "SIGN_DOCUMENT");
            handler_calls.fetch_add(1, Ordering::SeqCst);
        }));

        service
            .log(CreateAuditLog::new(1, "SIGN_DOCUMENT", "documents").severity(Severity::Critical))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        service
            .log(CreateAuditLog::new(1, "LOGIN", "authenticator"))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_feature_audit_config_fails() {
        let service = service("missing_feature");
        let err = service.get_feature_audit_config("ghost").unwrap_err();
        assert!(matches!(err, AuditError::FeatureNotFound(_)));
    }
}
