//! Audit log repository
//!
//! SQLite-backed persistence for audit logs. The schema is created
//! idempotently on construction; every create and delete runs as its
//! own transaction and commits before returning.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};

use super::types::{AuditLog, AuditLogFilter, CreateAuditLog, LogLevel, Severity};
use super::{AuditError, AuditResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    username TEXT NOT NULL,
    feature TEXT NOT NULL,
    action TEXT NOT NULL,
    log_level TEXT NOT NULL,
    severity TEXT NOT NULL,
    ip_address TEXT,
    session_id TEXT,
    module TEXT,
    function TEXT,
    details TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_user_id ON audit_logs(user_id);
CREATE INDEX IF NOT EXISTS idx_audit_feature ON audit_logs(feature);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_severity ON audit_logs(severity);
CREATE INDEX IF NOT EXISTS idx_audit_log_level ON audit_logs(log_level);
";

const SELECT_COLUMNS: &str = "id, timestamp, user_id, username, feature, action, \
                              log_level, severity, ip_address, session_id, module, \
                              function, details";

/// SQLite repository for audit logs.
///
/// Owns a single connection shared across threads; writes are
/// serialized by the connection lock and SQLite's transaction
/// discipline.
pub struct AuditRepository {
    conn: Mutex<Connection>,
}

impl AuditRepository {
    /// Open (or create) the database at `db_path` and ensure the
    /// schema. `:memory:` yields a private in-memory database.
    pub fn new(db_path: &str) -> AuditResult<Self> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(db_path)
        }
        .map_err(|source| AuditError::Database {
            reason: format!("connecting to `{db_path}`"),
            source,
        })?;

        conn.execute_batch(SCHEMA)
            .map_err(|source| AuditError::Database {
                reason: "creating schema".to_string(),
                source,
            })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a new log entry; returns the generated id.
    ///
    /// The insert timestamp is taken here, at persistence time.
    pub fn create(&self, entry: &CreateAuditLog) -> AuditResult<i64> {
        let timestamp = Utc::now().to_rfc3339();
        let details = if entry.details.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&entry.details)?)
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|source| AuditError::Database {
            reason: "beginning insert transaction".to_string(),
            source,
        })?;

        tx.execute(
            "INSERT INTO audit_logs (
                timestamp, user_id, username, feature, action,
                log_level, severity, ip_address, session_id,
                module, function, details
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                timestamp,
                entry.user_id,
                entry.resolved_username(),
                entry.feature,
                entry.action,
                entry.log_level.as_str(),
                entry.severity.as_str(),
                entry.ip_address,
                entry.session_id,
                entry.module,
                entry.function,
                details,
            ],
        )
        .map_err(|source| AuditError::Database {
            reason: "inserting log".to_string(),
            source,
        })?;

        let id = tx.last_insert_rowid();
        tx.commit().map_err(|source| AuditError::Database {
            reason: "committing insert".to_string(),
            source,
        })?;

        Ok(id)
    }

    /// Fetch a single log by id.
    pub fn find_by_id(&self, log_id: i64) -> AuditResult<Option<AuditLog>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM audit_logs WHERE id = ?1"
            ))
            .map_err(|source| AuditError::Database {
                reason: format!("preparing lookup for log {log_id}"),
                source,
            })?;

        let mut rows = stmt
            .query_map([log_id], row_to_log)
            .map_err(|source| AuditError::Database {
                reason: format!("looking up log {log_id}"),
                source,
            })?;

        match rows.next() {
            Some(row) => row
                .map(Some)
                .map_err(|source| AuditError::Database {
                    reason: format!("reading log {log_id}"),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Fetch logs matching the filter, newest first (ties broken by
    /// descending id).
    pub fn find_by_filters(&self, filter: &AuditLogFilter) -> AuditResult<Vec<AuditLog>> {
        let (where_clause, mut params) = filter_conditions(filter);
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM audit_logs WHERE {where_clause} \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
        );
        params.push(SqlValue::Integer(i64::from(filter.limit)));
        params.push(SqlValue::Integer(i64::from(filter.offset)));

        self.query_logs(&query, params, "filtering logs")
    }

    /// Substring search over `action` and serialized `details`,
    /// combined with the given filter.
    pub fn search(&self, keyword: &str, filter: &AuditLogFilter) -> AuditResult<Vec<AuditLog>> {
        let (where_clause, mut params) = filter_conditions(filter);
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM audit_logs WHERE {where_clause} \
             AND (details LIKE ? OR action LIKE ?) \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
        );
        let pattern = format!("%{keyword}%");
        params.push(SqlValue::Text(pattern.clone()));
        params.push(SqlValue::Text(pattern));
        params.push(SqlValue::Integer(i64::from(filter.limit)));
        params.push(SqlValue::Integer(i64::from(filter.offset)));

        self.query_logs(&query, params, "searching logs")
    }

    /// Delete logs older than `cutoff`, optionally restricted to one
    /// feature. Returns the number of deleted rows.
    pub fn delete_before(
        &self,
        cutoff: DateTime<Utc>,
        feature: Option<&str>,
    ) -> AuditResult<u64> {
        let cutoff_str = cutoff.to_rfc3339();

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|source| AuditError::Database {
            reason: "beginning delete transaction".to_string(),
            source,
        })?;

        let deleted = match feature {
            Some(feature) => tx.execute(
                "DELETE FROM audit_logs WHERE timestamp < ?1 AND feature = ?2",
                rusqlite::params![cutoff_str, feature],
            ),
            None => tx.execute(
                "DELETE FROM audit_logs WHERE timestamp < ?1",
                rusqlite::params![cutoff_str],
            ),
        }
        .map_err(|source| AuditError::Database {
            reason: "deleting old logs".to_string(),
            source,
        })?;

        tx.commit().map_err(|source| AuditError::Database {
            reason: "committing delete".to_string(),
            source,
        })?;

        Ok(deleted as u64)
    }

    /// Total number of stored logs.
    pub fn count(&self) -> AuditResult<u64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM audit_logs", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|count| count as u64)
        .map_err(|source| AuditError::Database {
            reason: "counting logs".to_string(),
            source,
        })
    }

    fn query_logs(
        &self,
        query: &str,
        params: Vec<SqlValue>,
        reason: &str,
    ) -> AuditResult<Vec<AuditLog>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(query).map_err(|source| AuditError::Database {
            reason: format!("preparing query while {reason}"),
            source,
        })?;

        let rows = stmt
            .query_map(params_from_iter(params), row_to_log)
            .map_err(|source| AuditError::Database {
                reason: reason.to_string(),
                source,
            })?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(row.map_err(|source| AuditError::Database {
                reason: reason.to_string(),
                source,
            })?);
        }
        Ok(logs)
    }
}

/// Build the AND-composed WHERE clause and its parameters.
fn filter_conditions(filter: &AuditLogFilter) -> (String, Vec<SqlValue>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(user_id) = filter.user_id {
        conditions.push("user_id = ?");
        params.push(SqlValue::Integer(user_id));
    }
    if let Some(feature) = &filter.feature {
        conditions.push("feature = ?");
        params.push(SqlValue::Text(feature.clone()));
    }
    if let Some(action) = &filter.action {
        conditions.push("action = ?");
        params.push(SqlValue::Text(action.clone()));
    }
    if let Some(level) = filter.log_level {
        conditions.push("log_level = ?");
        params.push(SqlValue::Text(level.as_str().to_string()));
    }
    if let Some(severity) = filter.severity {
        conditions.push("severity = ?");
        params.push(SqlValue::Text(severity.as_str().to_string()));
    }
    if let Some(start) = filter.start_date {
        conditions.push("timestamp >= ?");
        params.push(SqlValue::Text(start.to_rfc3339()));
    }
    if let Some(end) = filter.end_date {
        conditions.push("timestamp <= ?");
        params.push(SqlValue::Text(end.to_rfc3339()));
    }

    let where_clause = if conditions.is_empty() {
        "1=1".to_string()
    } else {
        conditions.join(" AND ")
    };
    (where_clause, params)
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditLog> {
    let timestamp_raw: String = row.get(1)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let log_level_raw: String = row.get(6)?;
    let severity_raw: String = row.get(7)?;
    let details_raw: Option<String> = row.get(12)?;
    let details: HashMap<String, serde_json::Value> = details_raw
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    Ok(AuditLog {
        id: row.get(0)?,
        timestamp,
        user_id: row.get(2)?,
        username: row.get(3)?,
        feature: row.get(4)?,
        action: row.get(5)?,
        log_level: log_level_raw.parse().unwrap_or(LogLevel::Info),
        severity: severity_raw.parse().unwrap_or(Severity::Info),
        ip_address: row.get(8)?,
        session_id: row.get(9)?,
        module: row.get(10)?,
        function: row.get(11)?,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository() -> AuditRepository {
        AuditRepository::new(":memory:").unwrap()
    }

    fn entry(user_id: i64, action: &str, feature: &str) -> CreateAuditLog {
        CreateAuditLog::new(user_id, action, feature)
    }

    #[test]
    fn test_create_and_find_by_id() {
        let repo = repository();
        let id = repo
            .create(&entry(1, "LOGIN", "authenticator").detail("attempts", 1))
            .unwrap();
        assert!(id > 0);

        let log = repo.find_by_id(id).unwrap().unwrap();
        assert_eq!(log.id, id);
        assert_eq!(log.user_id, 1);
        assert_eq!(log.username, "user_1");
        assert_eq!(log.action, "LOGIN");
        assert_eq!(log.details.get("attempts"), Some(&serde_json::json!(1)));
        assert!(log.timestamp <= Utc::now());
    }

    #[test]
    fn test_find_by_id_missing() {
        let repo = repository();
        assert!(repo.find_by_id(12345).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let repo = repository();
        let first = repo.create(&entry(1, "A", "f")).unwrap();
        let second = repo.create(&entry(1, "B", "f")).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_filters_compose_with_and() {
        let repo = repository();
        repo.create(&entry(1, "LOGIN", "authenticator")).unwrap();
        repo.create(&entry(2, "LOGIN", "authenticator")).unwrap();
        repo.create(&entry(1, "CREATE_USER", "user_management"))
            .unwrap();

        let filter = AuditLogFilter::new().user_id(1).feature("authenticator");
        let logs = repo.find_by_filters(&filter).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "LOGIN");
        assert_eq!(logs[0].user_id, 1);
    }

    #[test]
    fn test_results_ordered_newest_first() {
        let repo = repository();
        for i in 0..5 {
            repo.create(&entry(1, &format!("ACTION_{i}"), "f")).unwrap();
        }

        let logs = repo.find_by_filters(&AuditLogFilter::new()).unwrap();
        assert_eq!(logs.len(), 5);
        for pair in logs.windows(2) {
            assert!(pair[0].id > pair[1].id);
        }
    }

    #[test]
    fn test_limit_and_offset() {
        let repo = repository();
        for i in 0..10 {
            repo.create(&entry(1, &format!("ACTION_{i}"), "f")).unwrap();
        }

        let page = repo
            .find_by_filters(&AuditLogFilter::new().limit(3).offset(2))
            .unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].action, "ACTION_7");
    }

    #[test]
    fn test_search_matches_action_and_details() {
        let repo = repository();
        repo.create(&entry(1, "SIGN_DOCUMENT", "documents")).unwrap();
        repo.create(&entry(1, "LOGIN", "authenticator").detail("document", "QM-17"))
            .unwrap();
        repo.create(&entry(1, "LOGOUT", "authenticator")).unwrap();

        let hits = repo.search("DOCUMENT", &AuditLogFilter::new()).unwrap();
        assert_eq!(hits.len(), 1);
        let hits = repo.search("QM-17", &AuditLogFilter::new()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].action, "LOGIN");
    }

    #[test]
    fn test_delete_before_with_feature() {
        let repo = repository();
        repo.create(&entry(1, "OLD", "alpha")).unwrap();
        repo.create(&entry(1, "OLD", "beta")).unwrap();

        let future = Utc::now() + chrono::Duration::days(1);
        let deleted = repo.delete_before(future, Some("alpha")).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(repo.count().unwrap(), 1);

        let deleted = repo.delete_before(future, None).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_before_keeps_recent_rows() {
        let repo = repository();
        repo.create(&entry(1, "RECENT", "f")).unwrap();

        let past = Utc::now() - chrono::Duration::days(30);
        let deleted = repo.delete_before(past, None).unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(repo.count().unwrap(), 1);
    }
}
