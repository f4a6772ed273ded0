//! Licensing service
//!
//! Coordinates license loading, verification and entitlement checks.
//! Initialization happens once at construction (boot time); the
//! cached verification result and entitlements answer all runtime
//! queries.

use parking_lot::RwLock;

use super::fingerprint::FingerprintProvider;
use super::license::{Entitlements, LicenseErrorCode, VerificationResult};
use super::repository::LicenseBackend;

/// Main licensing service.
pub struct LicensingService {
    backend: Box<dyn LicenseBackend>,
    fingerprint_provider: Box<dyn FingerprintProvider>,
    verification: RwLock<VerificationResult>,
    entitlements: RwLock<Entitlements>,
}

impl LicensingService {
    /// Create the service and immediately load + verify the license.
    pub fn new(
        backend: Box<dyn LicenseBackend>,
        fingerprint_provider: Box<dyn FingerprintProvider>,
    ) -> Self {
        let service = Self {
            backend,
            fingerprint_provider,
            verification: RwLock::new(VerificationResult::missing()),
            entitlements: RwLock::new(Entitlements::default()),
        };
        service.initialize();
        log::info!("LicensingService initialized");
        service
    }

    /// Current verification status.
    pub fn verification(&self) -> VerificationResult {
        self.verification.read().clone()
    }

    /// Current entitlements; empty without a valid license.
    pub fn entitlements(&self) -> Entitlements {
        self.entitlements.read().clone()
    }

    /// Whether `feature_code` is allowed by the current license.
    pub fn is_feature_allowed(&self, feature_code: &str) -> Result<(), LicenseErrorCode> {
        if !self.verification.read().is_valid() {
            return Err(LicenseErrorCode::LicenseMissing);
        }
        if !self.entitlements.read().is_entitled(feature_code) {
            return Err(LicenseErrorCode::FeatureNotEntitled);
        }
        Ok(())
    }

    /// Re-load and re-verify the license from the backend.
    pub fn refresh(&self) {
        log::info!("Refreshing license");
        self.backend.refresh();
        self.initialize();
    }

    fn initialize(&self) {
        let machine_fp = self.fingerprint_provider.fingerprint_hash();
        log::debug!("Machine fingerprint: {}...", &machine_fp[..machine_fp.len().min(20)]);

        let Some(license) = self.backend.load_license() else {
            *self.verification.write() = VerificationResult::missing();
            *self.entitlements.write() = Entitlements::default();
            log::warn!("No license found, running with no entitlements");
            return;
        };

        let verification = self.backend.verify(&license, &machine_fp);
        if verification.is_valid() {
            let entitlements = self.backend.entitlements(&license);
            log::info!(
                "License verified: {}, entitlements: {:?}",
                license.license_id,
                entitlements.entitled_features()
            );
            *self.entitlements.write() = entitlements;
        } else {
            log::warn!("License verification failed: {}", verification.message);
            *self.entitlements.write() = Entitlements::default();
        }
        *self.verification.write() = verification;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::licensing::canonical::to_canonical_json;
    use crate::licensing::fingerprint::StaticFingerprintProvider;
    use crate::licensing::license::{LicenseRecord, LicenseStatus};
    use crate::licensing::repository::FileLicenseRepository;
    use crate::licensing::signature::SignatureVerifier;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn provider() -> Box<StaticFingerprintProvider> {
        Box::new(StaticFingerprintProvider::new(
            Some("test-guid".to_string()),
            None,
            None,
        ))
    }

    fn signed_license(entitlements: &[(&str, bool)], fingerprints: Vec<String>) -> LicenseRecord {
        let mut license = LicenseRecord {
            schema: "qumos-license-1".to_string(),
            license_id: "LIC-42".to_string(),
            customer: "ACME GmbH".to_string(),
            issued_at: "2026-01-01T00:00:00".to_string(),
            valid_until: "2999-01-01T00:00:00".to_string(),
            allowed_fingerprints: fingerprints,
            entitlements: entitlements
                .iter()
                .map(|(code, flag)| (code.to_string(), *flag))
                .collect(),
            signature: String::new(),
        };
        let value = serde_json::to_value(&license).unwrap();
        license.signature = SignatureVerifier::sign_digest(&to_canonical_json(&value, &["signature"]));
        license
    }

    fn write_license(name: &str, license: &LicenseRecord) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("qumos_lic_{}_{}.json", name, std::process::id()));
        std::fs::write(&path, serde_json::to_string_pretty(license).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_missing_license_yields_no_entitlements() {
        let backend = Box::new(FileLicenseRepository::new(
            Path::new("/nonexistent"),
            SignatureVerifier::default(),
        ));
        let service = LicensingService::new(backend, provider());

        assert_eq!(service.verification().status, LicenseStatus::Missing);
        assert_eq!(
            service.is_feature_allowed("translation"),
            Err(LicenseErrorCode::LicenseMissing)
        );
    }

    #[test]
    fn test_valid_license_grants_entitlements() {
        let fp = provider().fingerprint_hash();
        let license = signed_license(&[("translation", true), ("audittrail", false)], vec![fp]);
        let path = write_license("valid", &license);

        let backend = Box::new(FileLicenseRepository::new(
            &path,
            SignatureVerifier::default(),
        ));
        let service = LicensingService::new(backend, provider());

        assert!(service.verification().is_valid());
        assert_eq!(service.is_feature_allowed("translation"), Ok(()));
        assert_eq!(
            service.is_feature_allowed("audittrail"),
            Err(LicenseErrorCode::FeatureNotEntitled)
        );
        assert_eq!(
            service.is_feature_allowed("unknown"),
            Err(LicenseErrorCode::FeatureNotEntitled)
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_fingerprint_mismatch_blocks_entitlements() {
        let license = signed_license(&[("translation", true)], vec!["hex:other".to_string()]);
        let path = write_license("mismatch", &license);

        let backend = Box::new(FileLicenseRepository::new(
            &path,
            SignatureVerifier::default(),
        ));
        let service = LicensingService::new(backend, provider());

        assert_eq!(
            service.verification().status,
            LicenseStatus::FingerprintMismatch
        );
        assert!(service.entitlements().features.is_empty());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_refresh_picks_up_new_license() {
        let path = std::env::temp_dir().join(format!("qumos_lic_refresh_{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let backend = Box::new(FileLicenseRepository::new(
            &path,
            SignatureVerifier::default(),
        ));
        let service = LicensingService::new(backend, provider());
        assert_eq!(service.verification().status, LicenseStatus::Missing);

        let fp = provider().fingerprint_hash();
        let license = signed_license(&[("translation", true)], vec![fp]);
        std::fs::write(&path, serde_json::to_string(&license).unwrap()).unwrap();

        service.refresh();
        assert!(service.verification().is_valid());

        std::fs::remove_file(&path).ok();
    }
}
