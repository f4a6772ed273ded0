//! QUMOS - Modular Quality Management Platform
//!
//! Main entry point. Boots the platform through the loader: typed
//! environment, service container, feature discovery, license gate
//! and the mandatory audit trail.

use std::sync::Arc;

use qumos::audit::{AuditService, CreateAuditLog};
use qumos::{keys, Loader};

fn main() -> anyhow::Result<()> {
    // Initialize logging with configurable level.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("═══════════════════════════════════════════════════════════");
    log::info!("  QUMOS - Modular Quality Management Platform");
    log::info!("  Version: {}", qumos::VERSION);
    log::info!("═══════════════════════════════════════════════════════════");

    let project_root = std::env::current_dir()?;
    log::info!("Project root: {}", project_root.display());

    let mut loader = Loader::new(&project_root);
    let boot_log = loader.boot()?;

    log::info!("Boot order: {:?}", boot_log);

    let container = loader.container();
    let mut services = container.list_keys();
    services.sort();
    log::info!("Registered services: {:?}", services);

    // Record the successful start through the mandatory audit sink.
    let audit: Arc<AuditService> = container.resolve(keys::AUDIT_SINK)?;
    audit.log(
        CreateAuditLog::new(0, "APPLICATION_STARTED", "audittrail")
            .detail("boot_order", boot_log.clone())
            .detail("version", qumos::VERSION),
    )?;

    log::info!("═══════════════════════════════════════════════════════════");
    log::info!("  QUMOS boot complete ({} features)", boot_log.len());
    log::info!("═══════════════════════════════════════════════════════════");

    Ok(())
}
