//! Audit access policy
//!
//! Decides who may read and export audit logs:
//! - the system user (id 0) has full access,
//! - admin/QMB users have full access,
//! - everyone else may only read their own logs,
//! - export is restricted to system/admin/QMB.

use super::types::AuditLogFilter;

/// Role-scoped access control for audit logs.
pub struct AuditPolicy {
    admin_user_ids: Vec<i64>,
    qmb_user_ids: Vec<i64>,
}

impl AuditPolicy {
    /// Policy with explicit admin and QMB user ids.
    pub fn new(admin_user_ids: Vec<i64>, qmb_user_ids: Vec<i64>) -> Self {
        Self {
            admin_user_ids,
            qmb_user_ids,
        }
    }

    /// Whether `user_id` may read logs matching `filter`.
    ///
    /// A plain user is only admitted when the filter pins `user_id` to
    /// their own id; an unscoped filter requires elevated access.
    pub fn can_read_logs(&self, user_id: i64, filter: &AuditLogFilter) -> bool {
        if user_id == 0 {
            return true;
        }
        if self.is_admin_or_qmb(user_id) {
            return true;
        }
        match filter.user_id {
            Some(filtered) => filtered == user_id,
            None => false,
        }
    }

    /// Whether `user_id` may export logs. Export always requires
    /// system or admin/QMB access.
    pub fn can_export_logs(&self, user_id: i64) -> bool {
        user_id == 0 || self.is_admin_or_qmb(user_id)
    }

    fn is_admin_or_qmb(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id) || self.qmb_user_ids.contains(&user_id)
    }
}

impl Default for AuditPolicy {
    // Placeholder ids until the user-management integration lands.
    fn default() -> Self {
        Self::new(vec![1], vec![2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_user_has_full_access() {
        let policy = AuditPolicy::default();
        assert!(policy.can_read_logs(0, &AuditLogFilter::new()));
        assert!(policy.can_export_logs(0));
    }

    #[test]
    fn test_admin_and_qmb_have_full_access() {
        let policy = AuditPolicy::default();
        assert!(policy.can_read_logs(1, &AuditLogFilter::new()));
        assert!(policy.can_read_logs(2, &AuditLogFilter::new().user_id(42)));
        assert!(policy.can_export_logs(1));
        assert!(policy.can_export_logs(2));
    }

    #[test]
    fn test_plain_user_reads_only_own_logs() {
        let policy = AuditPolicy::default();
        assert!(policy.can_read_logs(42, &AuditLogFilter::new().user_id(42)));
        assert!(!policy.can_read_logs(42, &AuditLogFilter::new().user_id(99)));
        assert!(!policy.can_read_logs(42, &AuditLogFilter::new()));
    }

    #[test]
    fn test_plain_user_cannot_export() {
        let policy = AuditPolicy::default();
        assert!(!policy.can_export_logs(42));
    }
}
