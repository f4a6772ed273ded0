//! Configurator service
//!
//! Thin orchestrator over the feature repository and the app-config
//! repository: discovery, meta lookup, role-filtered registry listing
//! and global configuration.

use super::app_config::{AppConfig, ConfigRepository};
use super::descriptor::{FeatureDescriptor, FeatureRegistryEntry};
use super::features::FeatureRepository;
use super::ConfigResult;

/// Central service for feature discovery and configuration.
pub struct ConfiguratorService {
    feature_repository: FeatureRepository,
    config_repository: ConfigRepository,
}

impl ConfiguratorService {
    /// Create the service over its repositories.
    pub fn new(
        feature_repository: FeatureRepository,
        config_repository: ConfigRepository,
    ) -> Self {
        log::info!("ConfiguratorService initialized");
        Self {
            feature_repository,
            config_repository,
        }
    }

    /// Discover every feature below the features root.
    pub fn discover_features(&self) -> ConfigResult<Vec<FeatureDescriptor>> {
        log::info!("Starting feature discovery");
        let descriptors = self.feature_repository.discover_all()?;
        log::info!("Discovered {} features", descriptors.len());
        Ok(descriptors)
    }

    /// Load the descriptor for one feature.
    pub fn get_feature_meta(&self, feature_id: &str) -> ConfigResult<FeatureDescriptor> {
        self.feature_repository.get_by_id(feature_id)
    }

    /// Registry entries for all features, optionally filtered by role,
    /// sorted by `(sort_order, id)`.
    pub fn get_all_features(&self, role: Option<&str>) -> ConfigResult<Vec<FeatureRegistryEntry>> {
        let mut descriptors = self.feature_repository.discover_all()?;

        if let Some(role) = role {
            descriptors.retain(|d| d.is_visible_for_role(role));
            log::debug!(
                "Filtered to {} features visible for role {}",
                descriptors.len(),
                role
            );
        }

        descriptors.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(descriptors
            .into_iter()
            .map(FeatureRegistryEntry::active)
            .collect())
    }

    /// Validate one feature's `meta.json`, including the id/folder
    /// convention.
    pub fn validate_meta(&self, feature_id: &str) -> ConfigResult<bool> {
        self.feature_repository.validate(feature_id)
    }

    /// Load the global app configuration; failures surface only in
    /// strict mode.
    pub fn get_app_config(&self, strict: bool) -> ConfigResult<AppConfig> {
        self.config_repository.load_app_config(strict)
    }
}
