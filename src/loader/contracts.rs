//! Collaborator service contracts
//!
//! Minimal in-process implementations behind the well-known keys of
//! the user-management, authenticator and translation features. The
//! full features (CRUD surfaces, session persistence, TSV catalogs)
//! live outside the core platform; these contracts give the loader
//! real services to register and the rest of the platform something
//! to resolve.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// A known user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// User id; 0 is reserved for the system.
    pub id: i64,
    /// Login name.
    pub username: String,
    /// Role name (e.g. `ADMIN`, `QMB`, `USER`).
    pub role: String,
    /// Whether the account may log in.
    pub active: bool,
}

/// In-memory user store behind `user.repository`.
pub struct UserRegistry {
    users: RwLock<HashMap<i64, UserRecord>>,
}

impl UserRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Registry seeded with the built-in admin and QMB accounts.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.upsert(UserRecord {
            id: 1,
            username: "admin".to_string(),
            role: "ADMIN".to_string(),
            active: true,
        });
        registry.upsert(UserRecord {
            id: 2,
            username: "qmb".to_string(),
            role: "QMB".to_string(),
            active: true,
        });
        registry
    }

    /// Insert or replace a user.
    pub fn upsert(&self, user: UserRecord) {
        self.users.write().insert(user.id, user);
    }

    /// Look up a user by id.
    pub fn get(&self, user_id: i64) -> Option<UserRecord> {
        self.users.read().get(&user_id).cloned()
    }

    /// Remove a user; returns whether one was present.
    pub fn remove(&self, user_id: i64) -> bool {
        self.users.write().remove(&user_id).is_some()
    }

    /// All users, ordered by id.
    pub fn all(&self) -> Vec<UserRecord> {
        let mut users: Vec<UserRecord> = self.users.read().values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// User lookup service behind `user.service`.
pub struct UserDirectory {
    registry: Arc<UserRegistry>,
}

impl UserDirectory {
    /// Directory over the given registry.
    pub fn new(registry: Arc<UserRegistry>) -> Self {
        Self { registry }
    }

    /// Find a user by id.
    pub fn find(&self, user_id: i64) -> Option<UserRecord> {
        self.registry.get(user_id)
    }

    /// Display name for a user id: `SYSTEM` for 0, the username when
    /// known, `user_<id>` otherwise.
    pub fn display_name(&self, user_id: i64) -> String {
        if user_id == 0 {
            return "SYSTEM".to_string();
        }
        match self.registry.get(user_id) {
            Some(user) => user.username,
            None => format!("user_{user_id}"),
        }
    }

    /// Role of a user, when known.
    pub fn role(&self, user_id: i64) -> Option<String> {
        self.registry.get(user_id).map(|u| u.role)
    }
}

struct Session {
    user_id: i64,
    expires_at: DateTime<Utc>,
}

/// Session-token service behind `auth.service`.
pub struct SessionAuthenticator {
    users: Arc<UserRegistry>,
    timeout: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionAuthenticator {
    /// Authenticator with the given session timeout.
    pub fn new(users: Arc<UserRegistry>, timeout_minutes: u32) -> Self {
        Self {
            users,
            timeout: Duration::minutes(i64::from(timeout_minutes)),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a session for an active user, returning the token.
    pub fn login(&self, user_id: i64) -> Option<String> {
        let user = self.users.get(user_id)?;
        if !user.active {
            log::warn!("Login rejected for inactive user {}", user_id);
            return None;
        }

        let token = format!("{:032x}{:08x}", rand::random::<u128>(), user_id as u32);
        self.sessions.write().insert(
            token.clone(),
            Session {
                user_id,
                expires_at: Utc::now() + self.timeout,
            },
        );
        log::info!("Session opened for user {}", user_id);
        Some(token)
    }

    /// Resolve a token to its user id; expired sessions are dropped.
    pub fn validate(&self, token: &str) -> Option<i64> {
        let mut sessions = self.sessions.write();
        match sessions.get(token) {
            Some(session) if session.expires_at > Utc::now() => Some(session.user_id),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    /// Close a session; returns whether one was open.
    pub fn logout(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }
}

/// In-memory translation table behind `translation.service`.
pub struct TranslationCatalog {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl TranslationCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a translation.
    pub fn insert(
        &self,
        language: impl Into<String>,
        key: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.entries
            .write()
            .entry(language.into())
            .or_default()
            .insert(key.into(), text.into());
    }

    /// Translate `key` into `language`, falling back to the key itself.
    pub fn translate(&self, language: &str, key: &str) -> String {
        self.entries
            .read()
            .get(language)
            .and_then(|table| table.get(key))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

impl Default for TranslationCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults() {
        let registry = UserRegistry::with_defaults();
        assert_eq!(registry.get(1).unwrap().role, "ADMIN");
        assert_eq!(registry.get(2).unwrap().role, "QMB");
        assert!(registry.get(3).is_none());
        assert_eq!(registry.all().len(), 2);
    }

    #[test]
    fn test_directory_display_names() {
        let registry = Arc::new(UserRegistry::with_defaults());
        let directory = UserDirectory::new(registry);

        assert_eq!(directory.display_name(0), "SYSTEM");
        assert_eq!(directory.display_name(1), "admin");
        assert_eq!(directory.display_name(77), "user_77");
    }

    #[test]
    fn test_session_round_trip() {
        let registry = Arc::new(UserRegistry::with_defaults());
        let auth = SessionAuthenticator::new(registry, 30);

        let token = auth.login(1).unwrap();
        assert_eq!(auth.validate(&token), Some(1));
        assert!(auth.logout(&token));
        assert_eq!(auth.validate(&token), None);
    }

    #[test]
    fn test_unknown_and_inactive_users_cannot_login() {
        let registry = Arc::new(UserRegistry::with_defaults());
        registry.upsert(UserRecord {
            id: 9,
            username: "ghost".to_string(),
            role: "USER".to_string(),
            active: false,
        });
        let auth = SessionAuthenticator::new(registry, 30);

        assert!(auth.login(42).is_none());
        assert!(auth.login(9).is_none());
    }

    #[test]
    fn test_expired_session_is_dropped() {
        let registry = Arc::new(UserRegistry::with_defaults());
        let auth = SessionAuthenticator::new(registry, 0);

        let token = auth.login(1).unwrap();
        assert_eq!(auth.validate(&token), None);
    }

    #[test]
    fn test_translation_fallback() {
        let catalog = TranslationCatalog::new();
        catalog.insert("de", "menu.audit", "Audit-Protokoll");

        assert_eq!(catalog.translate("de", "menu.audit"), "Audit-Protokoll");
        assert_eq!(catalog.translate("en", "menu.audit"), "menu.audit");
    }
}
