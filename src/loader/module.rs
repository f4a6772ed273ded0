//! Feature modules
//!
//! One record per known feature carrying its registration and start
//! hooks as plain functions. The loader dispatches into this table in
//! boot order; a plugin-capable build would resolve the hooks from
//! the feature's own code instead.

use std::sync::Arc;

use crate::audit::policy::AuditPolicy;
use crate::audit::repository::AuditRepository;
use crate::audit::service::AuditService;
use crate::audit::types::CreateAuditLog;
use crate::configurator::service::ConfiguratorService;
use crate::core::container::{Container, ContainerError};
use crate::core::database::parse_database_path;
use crate::core::env::AppEnv;

use super::contracts::{SessionAuthenticator, TranslationCatalog, UserDirectory, UserRegistry};
use super::{keys, LoaderResult};

/// Registration hook: wires the feature's services into the container.
pub type RegisterFn = fn(&Container, &Arc<AppEnv>) -> LoaderResult<()>;

/// Start hook: runs after every feature is registered.
pub type StartFn = fn(&Container) -> LoaderResult<()>;

/// A known feature and its lifecycle hooks.
pub struct FeatureModule {
    /// Feature id; matches the feature folder and descriptor id.
    pub id: &'static str,
    /// Registration hook.
    pub register: RegisterFn,
    /// Start hook.
    pub start: StartFn,
}

/// The built-in feature table, in no particular order; the loader
/// sequences calls by the computed boot order.
pub fn builtin_modules() -> &'static [FeatureModule] {
    &[
        FeatureModule {
            id: "audittrail",
            register: register_audittrail,
            start: start_audittrail,
        },
        FeatureModule {
            id: "user_management",
            register: register_user_management,
            start: start_noop,
        },
        FeatureModule {
            id: "authenticator",
            register: register_authenticator,
            start: start_noop,
        },
        FeatureModule {
            id: "translation",
            register: register_translation,
            start: start_noop,
        },
    ]
}

/// Find a built-in module by feature id.
pub fn find_module(feature_id: &str) -> Option<&'static FeatureModule> {
    builtin_modules().iter().find(|m| m.id == feature_id)
}

fn register_audittrail(container: &Container, env: &Arc<AppEnv>) -> LoaderResult<()> {
    let env = env.clone();
    container.register_singleton(keys::AUDIT_SERVICE, move |c| {
        let configurator: Arc<ConfiguratorService> = c.resolve(keys::CONFIGURATOR_SERVICE)?;
        let db_path = parse_database_path(&env.database_url);
        let repository =
            AuditRepository::new(&db_path).map_err(|e| ContainerError::FactoryFailed {
                key: keys::AUDIT_SERVICE.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Arc::new(AuditService::new(
            repository,
            AuditPolicy::default(),
            configurator,
            env.min_log_level,
            env.global_retention_days,
        )))
    })?;
    container.register_alias(keys::AUDIT_SINK, keys::AUDIT_SERVICE)?;

    log::info!("Audit service registered (mandatory)");
    Ok(())
}

fn start_audittrail(container: &Container) -> LoaderResult<()> {
    let audit: Arc<AuditService> = container.resolve(keys::AUDIT_SINK)?;
    // Subject to the normal level gate like every other record.
    if let Err(e) = audit.log(CreateAuditLog::new(0, "AUDIT_STARTED", "audittrail")) {
        log::warn!("Could not record audit start: {e}");
    }
    Ok(())
}

fn register_user_management(container: &Container, _env: &Arc<AppEnv>) -> LoaderResult<()> {
    container.register_singleton(keys::USER_REPOSITORY, |_| {
        Ok(Arc::new(UserRegistry::with_defaults()))
    })?;
    container.register_singleton(keys::USER_SERVICE, |c| {
        let registry: Arc<UserRegistry> = c.resolve(keys::USER_REPOSITORY)?;
        Ok(Arc::new(UserDirectory::new(registry)))
    })?;

    log::info!("User management service registered");
    Ok(())
}

fn register_authenticator(container: &Container, env: &Arc<AppEnv>) -> LoaderResult<()> {
    let timeout_minutes = env.session_timeout_minutes;
    container.register_singleton(keys::AUTH_SERVICE, move |c| {
        let users: Arc<UserRegistry> = c.resolve(keys::USER_REPOSITORY)?;
        Ok(Arc::new(SessionAuthenticator::new(users, timeout_minutes)))
    })?;

    log::info!("Authenticator service registered");
    Ok(())
}

fn register_translation(container: &Container, _env: &Arc<AppEnv>) -> LoaderResult<()> {
    container.register_singleton(keys::TRANSLATION_SERVICE, |_| {
        Ok(Arc::new(TranslationCatalog::new()))
    })?;

    log::info!("Translation service registered");
    Ok(())
}

fn start_noop(_container: &Container) -> LoaderResult<()> {
    Ok(())
}
