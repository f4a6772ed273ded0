//! License backend
//!
//! File-based license storage. Loads the signed JSON record from disk
//! and verifies it in order: signature over the canonical form, then
//! expiry, then machine fingerprint. The first failure short-circuits.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::canonical::to_canonical_json;
use super::license::{
    Entitlements, LicenseErrorCode, LicenseRecord, LicenseStatus, VerificationResult,
};
use super::signature::SignatureVerifier;

/// Storage and verification backend for licenses.
pub trait LicenseBackend: Send + Sync {
    /// Load the license record, `None` when absent or unreadable.
    fn load_license(&self) -> Option<LicenseRecord>;

    /// Verify the record against the caller's machine fingerprint.
    fn verify(&self, license: &LicenseRecord, machine_fp: &str) -> VerificationResult;

    /// Extract the entitlements map.
    fn entitlements(&self, license: &LicenseRecord) -> Entitlements;

    /// Re-read backend state. No-op by default.
    fn refresh(&self) {}
}

/// License backend reading a single JSON file from disk.
pub struct FileLicenseRepository {
    license_path: PathBuf,
    verifier: SignatureVerifier,
}

impl FileLicenseRepository {
    /// Backend over the given license file and verifier.
    pub fn new(license_path: impl Into<PathBuf>, verifier: SignatureVerifier) -> Self {
        let license_path = license_path.into();
        log::info!(
            "FileLicenseRepository initialized with path: {}",
            license_path.display()
        );
        Self {
            license_path,
            verifier,
        }
    }
}

impl LicenseBackend for FileLicenseRepository {
    fn load_license(&self) -> Option<LicenseRecord> {
        if self.license_path.as_os_str().is_empty() || !self.license_path.exists() {
            log::warn!("License file not found: {}", self.license_path.display());
            return None;
        }

        let text = match std::fs::read_to_string(&self.license_path) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Error reading license file: {e}");
                return None;
            }
        };

        match serde_json::from_str::<LicenseRecord>(&text) {
            Ok(record) => Some(record),
            Err(e) => {
                log::error!("Invalid JSON in license file: {e}");
                None
            }
        }
    }

    fn verify(&self, license: &LicenseRecord, machine_fp: &str) -> VerificationResult {
        let license_id = Some(license.license_id.clone());

        // 1. Signature over the canonical, signature-excluded form.
        let canonical = match serde_json::to_value(license) {
            Ok(value) => to_canonical_json(&value, &["signature"]),
            Err(e) => {
                return VerificationResult::failure(
                    LicenseStatus::InvalidFormat,
                    LicenseErrorCode::LicenseInvalidFormat,
                    format!("License not serializable: {e}"),
                    license_id,
                )
            }
        };
        if !self.verifier.verify(&canonical, &license.signature) {
            return VerificationResult::failure(
                LicenseStatus::InvalidSignature,
                LicenseErrorCode::LicenseInvalidSignature,
                "License signature verification failed",
                license_id,
            );
        }

        // 2. Expiry: valid strictly before valid_until.
        match parse_license_date(&license.valid_until) {
            Some(valid_until) => {
                if Utc::now() >= valid_until {
                    return VerificationResult::failure(
                        LicenseStatus::Expired,
                        LicenseErrorCode::LicenseExpired,
                        format!("License expired on {}", license.valid_until),
                        license_id,
                    );
                }
            }
            None => {
                return VerificationResult::failure(
                    LicenseStatus::InvalidFormat,
                    LicenseErrorCode::LicenseInvalidFormat,
                    format!("Invalid date format in license: {}", license.valid_until),
                    license_id,
                )
            }
        }

        // 3. Fingerprint binding, only when the license carries one.
        if !license.allowed_fingerprints.is_empty()
            && !license
                .allowed_fingerprints
                .iter()
                .any(|fp| fp == machine_fp)
        {
            return VerificationResult::failure(
                LicenseStatus::FingerprintMismatch,
                LicenseErrorCode::LicenseFingerprintMismatch,
                "Machine fingerprint not in allowed list",
                license_id,
            );
        }

        VerificationResult::valid(license.license_id.clone())
    }

    fn entitlements(&self, license: &LicenseRecord) -> Entitlements {
        Entitlements::new(license.entitlements.clone())
    }

    fn refresh(&self) {
        log::debug!("Refresh called on file backend (no-op)");
    }
}

/// Parse an ISO-8601 license date; RFC 3339 first, then naive
/// date-time and plain date forms, all treated as UTC.
fn parse_license_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}
