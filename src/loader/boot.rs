//! Application loader
//!
//! The boot protocol: load the environment, register infrastructure,
//! discover features, topologically sort them, register each feature
//! and verify the audit sink. The audit gate is hard; nothing boots
//! past a missing audit sink.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::configurator::app_config::ConfigRepository;
use crate::configurator::descriptor::FeatureDescriptor;
use crate::configurator::features::FeatureRepository;
use crate::configurator::service::ConfiguratorService;
use crate::core::container::Container;
use crate::core::database::DatabaseService;
use crate::core::env::{load_config, AppEnv};
use crate::licensing::fingerprint::MachineFingerprintProvider;
use crate::licensing::gatekeeper::FeatureGatekeeper;
use crate::licensing::repository::FileLicenseRepository;
use crate::licensing::service::LicensingService;
use crate::licensing::signature::SignatureVerifier;

use super::module::find_module;
use super::{keys, LoaderError, LoaderResult};

/// Feature ids registered as infrastructure rather than through the
/// module table. They cannot depend on the audit trail because the
/// audit trail depends on them.
const CORE_INFRASTRUCTURE: [&str; 3] = ["licensing", "configurator", "database"];

/// The feature id of the mandatory audit trail.
const AUDIT_FEATURE: &str = "audittrail";

/// Application loader and composition root.
///
/// ```no_run
/// use qumos::Loader;
///
/// let mut loader = Loader::new(".");
/// let boot_log = loader.boot().expect("boot failed");
/// let container = loader.container();
/// assert!(container.is_registered(qumos::keys::AUDIT_SINK));
/// # let _ = boot_log;
/// ```
pub struct Loader {
    config_path: Option<PathBuf>,
    project_root: PathBuf,
    skip_features: HashSet<String>,
    container: Arc<Container>,
    env: Option<Arc<AppEnv>>,
    boot_log: Vec<String>,
    booted: bool,
}

impl Loader {
    /// Loader rooted at the given project directory.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            config_path: None,
            project_root: project_root.into(),
            skip_features: HashSet::new(),
            container: Arc::new(Container::new()),
            env: None,
            boot_log: Vec::new(),
            booted: false,
        }
    }

    /// Use an explicit config file instead of `<project>/config.ini`.
    pub fn with_config_path(mut self, config_path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(config_path.into());
        self
    }

    /// Skip the given feature ids during boot. Skipping the audit
    /// trail aborts the boot.
    pub fn with_skip_features<I, S>(mut self, skip: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_features = skip.into_iter().map(Into::into).collect();
        self
    }

    /// The service container. Owned by the loader; shared with
    /// runtime callers.
    pub fn container(&self) -> Arc<Container> {
        self.container.clone()
    }

    /// The loaded environment; fails before boot.
    pub fn env(&self) -> LoaderResult<Arc<AppEnv>> {
        self.env
            .clone()
            .ok_or_else(|| LoaderError::Bootstrap("application not booted yet".to_string()))
    }

    /// Boot the application, returning the ids of registered features
    /// in boot order.
    ///
    /// Booting twice is a no-op returning the cached log.
    pub fn boot(&mut self) -> LoaderResult<Vec<String>> {
        if self.booted {
            log::warn!("Application already booted");
            return Ok(self.boot_log.clone());
        }

        log::info!("Starting application boot sequence");

        // Step 1: load configuration.
        let env = Arc::new(load_config(
            self.config_path.as_deref(),
            &self.project_root,
        )?);
        let env_instance = env.clone();
        self.container
            .register_singleton(keys::ENV, move |_| Ok(env_instance.clone()))?;
        self.env = Some(env.clone());
        log::info!("Configuration loaded");

        // Step 2: register infrastructure singletons.
        self.register_infrastructure(&env);

        // Step 3: discover features.
        let features = self.discover_features()?;

        // Step 4: compute boot order.
        let boot_order = compute_boot_order(&features)?;

        // Step 5: register features in boot order.
        for feature_id in boot_order {
            if self.skip_features.contains(&feature_id) {
                log::info!("Skipping feature: {}", feature_id);
                if feature_id == AUDIT_FEATURE {
                    return Err(LoaderError::AuditSinkNotAvailable(
                        "audittrail feature was skipped but audit is mandatory".to_string(),
                    ));
                }
                continue;
            }

            if !self.admit_feature(features.get(&feature_id))? {
                continue;
            }

            self.register_feature(&feature_id, &env)?;
            self.boot_log.push(feature_id.clone());

            // The hard gate: the audit sink must resolve before any
            // further feature may boot.
            if feature_id == AUDIT_FEATURE {
                self.verify_audit_sink()?;
            }
        }

        // Step 6: the audit sink must exist regardless of which
        // features were present.
        if !self.container.is_registered(keys::AUDIT_SINK) {
            return Err(LoaderError::AuditSinkNotAvailable(
                "audit sink was not registered".to_string(),
            ));
        }

        // Step 7: start features.
        self.start_features();

        self.booted = true;
        log::info!("Boot complete. Features loaded: {:?}", self.boot_log);
        Ok(self.boot_log.clone())
    }

    fn register_infrastructure(&self, env: &Arc<AppEnv>) {
        log::info!("Registering infrastructure services");

        // Licensing first, for the license check. Its absence is a
        // warning, not a boot failure.
        let licensing_env = env.clone();
        let result = self
            .container
            .register_singleton(keys::LICENSING_SERVICE, move |_| {
                let verifier = SignatureVerifier::from_key_file(&licensing_env.public_key_path);
                let backend = Box::new(FileLicenseRepository::new(
                    &licensing_env.license_path,
                    verifier,
                ));
                let fingerprint = Box::new(MachineFingerprintProvider::new());
                Ok(Arc::new(LicensingService::new(backend, fingerprint)))
            });
        if let Err(e) = result {
            log::warn!("Failed to register licensing: {e}");
        }

        // Configurator, for feature discovery.
        let configurator_env = env.clone();
        let result = self
            .container
            .register_singleton(keys::CONFIGURATOR_SERVICE, move |_| {
                Ok(Arc::new(ConfiguratorService::new(
                    FeatureRepository::new(&configurator_env.features_root),
                    ConfigRepository::new(&configurator_env.project_root),
                )))
            });
        if let Err(e) = result {
            log::warn!("Failed to register configurator: {e}");
        }

        // Database.
        let database_env = env.clone();
        let result = self
            .container
            .register_singleton(keys::DATABASE_SERVICE, move |_| {
                Ok(Arc::new(DatabaseService::new(
                    database_env.database_url.clone(),
                    database_env.db_echo,
                )))
            });
        if let Err(e) = result {
            log::warn!("Failed to register database: {e}");
        }
    }

    fn discover_features(&self) -> LoaderResult<HashMap<String, FeatureDescriptor>> {
        let configurator: Arc<ConfiguratorService> =
            self.container.resolve(keys::CONFIGURATOR_SERVICE)?;
        let descriptors = configurator.discover_features()?;

        let features: HashMap<String, FeatureDescriptor> = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        let mut ids: Vec<&str> = features.keys().map(String::as_str).collect();
        ids.sort_unstable();
        log::info!("Discovered {} features: {:?}", features.len(), ids);
        Ok(features)
    }

    /// Consult the license gatekeeper for features that require an
    /// entitlement. Features without a descriptor or without a license
    /// requirement pass through.
    fn admit_feature(&self, descriptor: Option<&FeatureDescriptor>) -> LoaderResult<bool> {
        let Some(descriptor) = descriptor else {
            return Ok(true);
        };

        let requires_license = !descriptor.is_core
            && descriptor
                .licensing
                .as_ref()
                .map(|l| l.requires_license)
                .unwrap_or(false);
        if !requires_license {
            return Ok(true);
        }

        let Some(licensing) = self
            .container
            .try_resolve::<LicensingService>(keys::LICENSING_SERVICE)?
        else {
            log::warn!(
                "Feature {} requires a license but no licensing service is registered",
                descriptor.id
            );
            return Ok(false);
        };

        let decision =
            FeatureGatekeeper::new().check_feature(descriptor, &licensing.entitlements());
        if !decision.allowed {
            log::warn!(
                "Feature {} blocked by license gate: {}",
                descriptor.id,
                decision.reason
            );
        }
        Ok(decision.allowed)
    }

    fn register_feature(&self, feature_id: &str, env: &Arc<AppEnv>) -> LoaderResult<()> {
        log::info!("Registering feature: {}", feature_id);

        if CORE_INFRASTRUCTURE.contains(&feature_id) {
            // Already registered as infrastructure.
            return Ok(());
        }

        match find_module(feature_id) {
            Some(module) => {
                (module.register)(&self.container, env).map_err(|e| match e {
                    fatal @ LoaderError::AuditSinkNotAvailable(_) => fatal,
                    other => LoaderError::FeatureLoad {
                        feature_id: feature_id.to_string(),
                        reason: other.to_string(),
                    },
                })
            }
            None => {
                log::warn!("No registration handler for feature: {}", feature_id);
                Ok(())
            }
        }
    }

    /// The hard gate: fail the boot unless the audit sink resolves to
    /// a live service.
    fn verify_audit_sink(&self) -> LoaderResult<()> {
        if !self.container.is_registered(keys::AUDIT_SINK) {
            return Err(LoaderError::AuditSinkNotAvailable(
                "audit sink is not registered".to_string(),
            ));
        }

        match self.container.resolve_any(keys::AUDIT_SINK) {
            Ok(_) => {
                log::info!("Audit sink verification passed (hard gate)");
                Ok(())
            }
            Err(e) => Err(LoaderError::AuditSinkNotAvailable(format!(
                "failed to resolve audit sink: {e}"
            ))),
        }
    }

    fn start_features(&self) {
        log::info!("Starting features");

        for feature_id in &self.boot_log {
            if let Some(module) = find_module(feature_id) {
                if let Err(e) = (module.start)(&self.container) {
                    log::warn!("Start hook for {} failed: {}", feature_id, e);
                }
            }
        }

        // Ensure schema creation on the database service.
        if self.container.is_registered(keys::DATABASE_SERVICE) {
            match self
                .container
                .resolve::<DatabaseService>(keys::DATABASE_SERVICE)
            {
                Ok(database) => {
                    if let Err(e) = database.ensure_schema() {
                        log::warn!("Failed to ensure database schema: {e}");
                    } else {
                        log::info!("Database schema ensured");
                    }
                }
                Err(e) => log::warn!("Failed to resolve database service: {e}"),
            }
        }
    }
}

/// Compute the boot order over the discovered features.
///
/// Kahn's algorithm with `(sort_order, id)` as the tiebreaker among
/// ready nodes. Edges are the declared dependencies restricted to the
/// discovered set, plus the implicit audit/database edges.
fn compute_boot_order(
    features: &HashMap<String, FeatureDescriptor>,
) -> LoaderResult<Vec<String>> {
    let feature_ids: HashSet<&str> = features.keys().map(String::as_str).collect();

    // Adjacency: feature -> the features it must wait for.
    let mut graph: HashMap<&str, HashSet<&str>> = HashMap::new();
    for (id, descriptor) in features {
        let mut deps: HashSet<&str> = descriptor
            .dependencies
            .iter()
            .map(String::as_str)
            .filter(|dep| feature_ids.contains(dep))
            .collect();

        let is_infrastructure = CORE_INFRASTRUCTURE.contains(&id.as_str());

        // Implicit edges. Infrastructure and the audit trail itself
        // are exempt, otherwise the graph could never be acyclic.
        if !is_infrastructure && id != AUDIT_FEATURE {
            let must_audit = descriptor
                .audit
                .as_ref()
                .map(|a| a.must_audit)
                .unwrap_or(false);
            if must_audit && feature_ids.contains(AUDIT_FEATURE) {
                deps.insert(AUDIT_FEATURE);
            }
            if feature_ids.contains("database") {
                deps.insert("database");
            }
        }

        if id == AUDIT_FEATURE {
            if feature_ids.contains("configurator") {
                deps.insert("configurator");
            }
            if feature_ids.contains("database") {
                deps.insert("database");
            }
        }

        graph.insert(id.as_str(), deps);
    }

    log::debug!("Dependency graph: {:?}", graph);

    let mut in_degree: HashMap<&str, usize> =
        graph.iter().map(|(id, deps)| (*id, deps.len())).collect();

    // Ready queue ordered by (sort_order, id).
    let mut ready: BTreeSet<(u32, &str)> = features
        .iter()
        .filter(|(id, _)| in_degree[id.as_str()] == 0)
        .map(|(id, descriptor)| (descriptor.sort_order, id.as_str()))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(features.len());
    while let Some(&(sort_order, id)) = ready.iter().next() {
        ready.remove(&(sort_order, id));
        order.push(id.to_string());

        for (other, deps) in &graph {
            if deps.contains(id) {
                if let Some(degree) = in_degree.get_mut(other) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert((features[*other].sort_order, *other));
                    }
                }
            }
        }
    }

    if order.len() != features.len() {
        let mut remaining: Vec<String> = features
            .keys()
            .filter(|id| !order.contains(id))
            .cloned()
            .collect();
        remaining.sort();
        return Err(LoaderError::CyclicDependency { remaining });
    }

    log::info!("Boot order: {:?}", order);
    Ok(order)
}
