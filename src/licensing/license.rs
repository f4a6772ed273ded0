//! License types
//!
//! The signed license record, verification status and error codes,
//! entitlements, and the gatekeeper's decision value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Outcome status of license verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseStatus {
    /// License verified successfully.
    Valid,
    /// No license file present.
    Missing,
    /// License file unreadable or structurally invalid.
    InvalidFormat,
    /// Signature check failed.
    InvalidSignature,
    /// License past its `valid_until` date.
    Expired,
    /// Machine fingerprint not in the allowed list.
    FingerprintMismatch,
}

/// Machine-readable license error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseErrorCode {
    /// No license installed.
    LicenseMissing,
    /// License unreadable or structurally invalid.
    LicenseInvalidFormat,
    /// Signature check failed.
    LicenseInvalidSignature,
    /// License expired.
    LicenseExpired,
    /// Machine fingerprint rejected.
    LicenseFingerprintMismatch,
    /// Feature code not entitled by the license.
    FeatureNotEntitled,
    /// Feature licensing metadata is invalid.
    FeatureMetaInvalid,
}

/// A signed license as stored on disk.
///
/// The canonical form for signature verification is this record with
/// the `signature` field excluded, keys sorted lexicographically and
/// no insignificant whitespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// Schema tag of the license format.
    pub schema: String,
    /// Unique license identifier.
    pub license_id: String,
    /// Licensed customer.
    pub customer: String,
    /// Issue date, ISO-8601.
    pub issued_at: String,
    /// Expiry date, ISO-8601; the license is valid strictly before it.
    pub valid_until: String,
    /// Machine fingerprint hashes the license is bound to; empty means
    /// unbound.
    #[serde(default)]
    pub allowed_fingerprints: Vec<String>,
    /// Feature-code entitlements.
    #[serde(default)]
    pub entitlements: HashMap<String, bool>,
    /// Signature blob, `b64:<base64>`.
    #[serde(default)]
    pub signature: String,
}

/// Result of verifying a license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Verification status.
    pub status: LicenseStatus,
    /// Error code for failed verification.
    pub error_code: Option<LicenseErrorCode>,
    /// Human-readable message.
    pub message: String,
    /// License id when one could be read.
    pub license_id: Option<String>,
}

impl VerificationResult {
    /// A successful verification of the given license.
    pub fn valid(license_id: impl Into<String>) -> Self {
        Self {
            status: LicenseStatus::Valid,
            error_code: None,
            message: "License is valid".to_string(),
            license_id: Some(license_id.into()),
        }
    }

    /// The no-license-installed result.
    pub fn missing() -> Self {
        Self {
            status: LicenseStatus::Missing,
            error_code: Some(LicenseErrorCode::LicenseMissing),
            message: "License file not found".to_string(),
            license_id: None,
        }
    }

    /// A failed verification with the given status and code.
    pub fn failure(
        status: LicenseStatus,
        error_code: LicenseErrorCode,
        message: impl Into<String>,
        license_id: Option<String>,
    ) -> Self {
        Self {
            status,
            error_code: Some(error_code),
            message: message.into(),
            license_id,
        }
    }

    /// Whether the license verified successfully.
    pub fn is_valid(&self) -> bool {
        self.status == LicenseStatus::Valid
    }
}

/// Feature-code entitlements carried by a license.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entitlements {
    /// Entitlement flags by feature code.
    pub features: HashMap<String, bool>,
}

impl Entitlements {
    /// Entitlements over the given flag map.
    pub fn new(features: HashMap<String, bool>) -> Self {
        Self { features }
    }

    /// Whether `feature_code` is entitled.
    pub fn is_entitled(&self, feature_code: &str) -> bool {
        self.features.get(feature_code).copied().unwrap_or(false)
    }

    /// All entitled feature codes, sorted.
    pub fn entitled_features(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self
            .features
            .iter()
            .filter(|(_, entitled)| **entitled)
            .map(|(code, _)| code.as_str())
            .collect();
        codes.sort_unstable();
        codes
    }
}

/// The gatekeeper's per-feature admission decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Whether the feature may register.
    pub allowed: bool,
    /// Feature code the decision refers to.
    pub feature_code: String,
    /// Human-readable reason.
    pub reason: String,
    /// Error code on denial.
    pub error_code: Option<LicenseErrorCode>,
}

impl GateDecision {
    /// An admission with the given reason.
    pub fn allow(feature_code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            feature_code: feature_code.into(),
            reason: reason.into(),
            error_code: None,
        }
    }

    /// A denial with the given reason and error code.
    pub fn deny(
        feature_code: impl Into<String>,
        reason: impl Into<String>,
        error_code: LicenseErrorCode,
    ) -> Self {
        Self {
            allowed: false,
            feature_code: feature_code.into(),
            reason: reason.into(),
            error_code: Some(error_code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entitlements() {
        let mut features = HashMap::new();
        features.insert("translation".to_string(), true);
        features.insert("audittrail".to_string(), false);
        let entitlements = Entitlements::new(features);

        assert!(entitlements.is_entitled("translation"));
        assert!(!entitlements.is_entitled("audittrail"));
        assert!(!entitlements.is_entitled("unknown"));
        assert_eq!(entitlements.entitled_features(), vec!["translation"]);
    }

    #[test]
    fn test_verification_result_constructors() {
        assert!(VerificationResult::valid("LIC-1").is_valid());
        let missing = VerificationResult::missing();
        assert!(!missing.is_valid());
        assert_eq!(missing.error_code, Some(LicenseErrorCode::LicenseMissing));
    }

    #[test]
    fn test_license_record_deserializes_with_defaults() {
        let record: LicenseRecord = serde_json::from_str(
            r#"{"schema": "qumos-license-1", "license_id": "L-1", "customer": "ACME",
                "issued_at": "2026-01-01", "valid_until": "2027-01-01"}"#,
        )
        .unwrap();
        assert!(record.allowed_fingerprints.is_empty());
        assert!(record.entitlements.is_empty());
        assert!(record.signature.is_empty());
    }
}
