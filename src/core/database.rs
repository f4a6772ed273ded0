//! Database service contract
//!
//! The minimal service registered under `database.service`. Feature
//! repositories own their own connections; this service owns the
//! configured URL, resolves it to a SQLite path and ensures the
//! database file is reachable at start.

use thiserror::Error;

/// Database service errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Parse a SQLite file path out of a database URL.
///
/// `sqlite:///qumos.db` becomes `qumos.db`; the in-memory forms map to
/// `:memory:`. Unknown schemes fall back to `audit.db` with a warning.
pub fn parse_database_path(database_url: &str) -> String {
    if database_url == "sqlite:///:memory:" || database_url == "sqlite://" {
        ":memory:".to_string()
    } else if let Some(path) = database_url.strip_prefix("sqlite:///") {
        path.to_string()
    } else {
        log::warn!(
            "Unknown database URL format: {}, using audit.db",
            database_url
        );
        "audit.db".to_string()
    }
}

/// Process-wide database service.
pub struct DatabaseService {
    url: String,
    echo: bool,
    path: String,
}

impl DatabaseService {
    /// Create a service for the given database URL.
    pub fn new(database_url: impl Into<String>, echo: bool) -> Self {
        let url = database_url.into();
        let path = parse_database_path(&url);
        Self { url, echo, path }
    }

    /// The configured database URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether SQL echoing is enabled.
    pub fn echo(&self) -> bool {
        self.echo
    }

    /// The resolved SQLite file path (or `:memory:`).
    pub fn sqlite_path(&self) -> &str {
        &self.path
    }

    /// Ensure the database file exists and is a usable SQLite database.
    ///
    /// Idempotent; opening the connection creates the file on first
    /// use.
    pub fn ensure_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.open()?;
        conn.query_row("PRAGMA user_version", [], |_| Ok(()))?;
        if self.echo {
            log::info!("SQL> PRAGMA user_version ({})", self.path);
        }
        log::debug!("Database schema ensured at {}", self.path);
        Ok(())
    }

    /// Probe the database, returning whether it is reachable.
    pub fn health_check(&self) -> bool {
        match self.ensure_schema() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Database health check failed: {}", e);
                false
            }
        }
    }

    fn open(&self) -> Result<rusqlite::Connection, DatabaseError> {
        let conn = if self.path == ":memory:" {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(&self.path)?
        };
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_database_path() {
        assert_eq!(parse_database_path("sqlite:///qumos.db"), "qumos.db");
        assert_eq!(parse_database_path("sqlite:///:memory:"), ":memory:");
        assert_eq!(parse_database_path("sqlite://"), ":memory:");
        assert_eq!(parse_database_path("postgres://host/db"), "audit.db");
    }

    #[test]
    fn test_ensure_schema_in_memory() {
        let service = DatabaseService::new("sqlite:///:memory:", false);
        assert_eq!(service.sqlite_path(), ":memory:");
        service.ensure_schema().unwrap();
        assert!(service.health_check());
    }

    #[test]
    fn test_ensure_schema_creates_file() {
        let path = std::env::temp_dir().join(format!("qumos_db_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let url = format!("sqlite:///{}", path.display());
        let service = DatabaseService::new(url, true);
        service.ensure_schema().unwrap();
        assert!(path.exists());

        std::fs::remove_file(&path).ok();
    }
}
