//! Licensing
//!
//! Loads a signed license from disk, verifies it (signature, expiry,
//! machine fingerprint) and gates feature registration on the
//! entitlements it carries. Verification failures are encoded in the
//! result, never raised; gatekeeper denials are plain return values.

pub mod canonical;
pub mod fingerprint;
pub mod gatekeeper;
pub mod license;
pub mod repository;
pub mod service;
pub mod signature;

pub use canonical::to_canonical_json;
pub use fingerprint::{
    FingerprintProvider, MachineFingerprint, MachineFingerprintProvider, StaticFingerprintProvider,
};
pub use gatekeeper::FeatureGatekeeper;
pub use license::{
    Entitlements, GateDecision, LicenseErrorCode, LicenseRecord, LicenseStatus, VerificationResult,
};
pub use repository::{FileLicenseRepository, LicenseBackend};
pub use service::LicensingService;
pub use signature::SignatureVerifier;
