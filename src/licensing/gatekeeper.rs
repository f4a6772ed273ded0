//! Feature gatekeeper
//!
//! Decides, per feature descriptor, whether registration is admitted
//! under the current entitlements. A pure function of its inputs; the
//! gatekeeper holds no state between calls.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::configurator::descriptor::FeatureDescriptor;

use super::license::{Entitlements, GateDecision, LicenseErrorCode};

static FEATURE_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("feature code pattern is valid"));

/// Admission gatekeeper for feature registration.
#[derive(Debug, Default)]
pub struct FeatureGatekeeper;

impl FeatureGatekeeper {
    /// Create the gatekeeper.
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `meta` may register under `entitlements`.
    ///
    /// Core features are always admitted, as are features without a
    /// licensing requirement. Licensed features need a well-formed
    /// `feature_code` and a truthy entitlement for it.
    pub fn check_feature(
        &self,
        meta: &FeatureDescriptor,
        entitlements: &Entitlements,
    ) -> GateDecision {
        if meta.is_core {
            log::debug!("Feature {} is core, allowing registration", meta.id);
            return GateDecision::allow(&meta.id, "Core feature is always allowed");
        }

        let licensing = meta.licensing.as_ref();
        let requires_license = licensing.map(|l| l.requires_license).unwrap_or(false);
        if !requires_license {
            log::debug!("Feature {} does not require a license", meta.id);
            return GateDecision::allow(&meta.id, "Feature does not require license");
        }

        let feature_code = licensing
            .and_then(|l| l.feature_code.as_deref())
            .unwrap_or("");
        if feature_code.is_empty() {
            log::error!(
                "Feature {} requires a license but has no feature_code",
                meta.id
            );
            return GateDecision::deny(
                &meta.id,
                "Feature requires license but feature_code is missing",
                LicenseErrorCode::FeatureMetaInvalid,
            );
        }

        if !FEATURE_CODE_PATTERN.is_match(feature_code) {
            log::error!("Invalid feature_code format: {}", feature_code);
            return GateDecision::deny(
                feature_code,
                format!("Invalid feature_code format: {feature_code}"),
                LicenseErrorCode::FeatureMetaInvalid,
            );
        }

        if entitlements.is_entitled(feature_code) {
            log::info!("Feature {} is entitled, allowing registration", feature_code);
            GateDecision::allow(
                feature_code,
                format!("Feature {feature_code} is entitled in license"),
            )
        } else {
            log::warn!(
                "Feature {} is not entitled, blocking registration",
                feature_code
            );
            GateDecision::deny(
                feature_code,
                format!("Feature {feature_code} is not entitled in license"),
                LicenseErrorCode::FeatureNotEntitled,
            )
        }
    }
}
