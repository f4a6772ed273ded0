//! Machine fingerprinting
//!
//! Builds the canonical machine identity string
//! `MG=<machine-guid>|UUID=<bios-uuid>|MB=<baseboard-serial>` and its
//! `hex:`-prefixed SHA-256 hash. Components that cannot be collected
//! become `-`; the hash is always computable.

use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use sha2::{Digest, Sha256};

/// Ceiling for each external fingerprint probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A collected machine fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineFingerprint {
    /// OS machine GUID / machine-id.
    pub machine_guid: Option<String>,
    /// BIOS/system UUID.
    pub bios_uuid: Option<String>,
    /// Baseboard serial number.
    pub baseboard_serial: Option<String>,
    /// Canonical identity string.
    pub canonical: String,
    /// `hex:`-prefixed SHA-256 of the canonical string.
    pub hash: String,
}

impl MachineFingerprint {
    /// Build a fingerprint from its components.
    pub fn from_components(
        machine_guid: Option<String>,
        bios_uuid: Option<String>,
        baseboard_serial: Option<String>,
    ) -> Self {
        let canonical = canonical_string(
            machine_guid.as_deref(),
            bios_uuid.as_deref(),
            baseboard_serial.as_deref(),
        );
        let hash = fingerprint_hash(&canonical);
        Self {
            machine_guid,
            bios_uuid,
            baseboard_serial,
            canonical,
            hash,
        }
    }
}

/// Source of the machine fingerprint.
pub trait FingerprintProvider: Send + Sync {
    /// Collect the full fingerprint.
    fn fingerprint(&self) -> MachineFingerprint;

    /// Only the fingerprint hash.
    fn fingerprint_hash(&self) -> String {
        self.fingerprint().hash
    }
}

/// Canonical identity string with `-` for unknown components.
pub fn canonical_string(
    machine_guid: Option<&str>,
    bios_uuid: Option<&str>,
    baseboard_serial: Option<&str>,
) -> String {
    format!(
        "MG={}|UUID={}|MB={}",
        machine_guid.unwrap_or("-"),
        bios_uuid.unwrap_or("-"),
        baseboard_serial.unwrap_or("-")
    )
}

/// `hex:`-prefixed SHA-256 of the canonical string.
pub fn fingerprint_hash(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    format!("hex:{}", hex::encode(digest))
}

/// Hardware-backed fingerprint provider for the current platform.
///
/// On Windows the components come from registry and WMI subprocess
/// probes; on Linux from DMI files with a subprocess fallback. Each
/// probe is capped at five seconds; a timed-out component degrades
/// to `-`.
#[derive(Debug, Default)]
pub struct MachineFingerprintProvider;

impl MachineFingerprintProvider {
    /// Create the platform provider.
    pub fn new() -> Self {
        Self
    }
}

impl FingerprintProvider for MachineFingerprintProvider {
    fn fingerprint(&self) -> MachineFingerprint {
        let fp = MachineFingerprint::from_components(
            machine_guid(),
            bios_uuid(),
            baseboard_serial(),
        );
        log::debug!("Machine fingerprint canonical: {}", fp.canonical);
        fp
    }
}

/// Fixed fingerprint, for tests and for pinning a known identity.
#[derive(Debug, Clone)]
pub struct StaticFingerprintProvider {
    fingerprint: MachineFingerprint,
}

impl StaticFingerprintProvider {
    /// Provider over fixed components.
    pub fn new(
        machine_guid: Option<String>,
        bios_uuid: Option<String>,
        baseboard_serial: Option<String>,
    ) -> Self {
        Self {
            fingerprint: MachineFingerprint::from_components(
                machine_guid,
                bios_uuid,
                baseboard_serial,
            ),
        }
    }
}

impl FingerprintProvider for StaticFingerprintProvider {
    fn fingerprint(&self) -> MachineFingerprint {
        self.fingerprint.clone()
    }
}

fn normalize(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Run a command, returning its stdout, with the probe timeout.
///
/// The command runs on a helper thread; when it exceeds the ceiling
/// the component is given up on and reported as unknown.
fn run_probe(program: &str, args: &[&str]) -> Option<String> {
    let program = program.to_string();
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let (tx, rx) = mpsc::channel();
    let program_for_thread = program.clone();

    std::thread::spawn(move || {
        let output = Command::new(&program_for_thread)
            .args(&args)
            .stdin(Stdio::null())
            .output();
        let _ = tx.send(output);
    });

    match rx.recv_timeout(PROBE_TIMEOUT) {
        Ok(Ok(output)) if output.status.success() => {
            normalize(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(_) => None,
        Err(_) => {
            log::warn!("Fingerprint probe `{program}` timed out");
            None
        }
    }
}

#[cfg(target_os = "linux")]
fn read_first_line(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.lines().next().map(String::from))
        .and_then(normalize)
}

#[cfg(target_os = "linux")]
fn machine_guid() -> Option<String> {
    read_first_line("/etc/machine-id").or_else(|| read_first_line("/var/lib/dbus/machine-id"))
}

#[cfg(target_os = "linux")]
fn bios_uuid() -> Option<String> {
    read_first_line("/sys/class/dmi/id/product_uuid")
        .or_else(|| run_probe("dmidecode", &["-s", "system-uuid"]))
}

#[cfg(target_os = "linux")]
fn baseboard_serial() -> Option<String> {
    read_first_line("/sys/class/dmi/id/board_serial")
        .or_else(|| run_probe("dmidecode", &["-s", "baseboard-serial-number"]))
}

#[cfg(windows)]
fn machine_guid() -> Option<String> {
    let output = run_probe(
        "reg",
        &[
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ],
    )?;
    output
        .lines()
        .find(|line| line.contains("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(String::from)
}

#[cfg(windows)]
fn bios_uuid() -> Option<String> {
    wmic_value(&["csproduct", "get", "UUID"])
}

#[cfg(windows)]
fn baseboard_serial() -> Option<String> {
    wmic_value(&["baseboard", "get", "SerialNumber"])
}

#[cfg(windows)]
fn wmic_value(args: &[&str]) -> Option<String> {
    let output = run_probe("wmic", args)?;
    // First line is the column header; the value follows.
    output.lines().nth(1).map(str::trim).and_then(|line| {
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    })
}

#[cfg(not(any(target_os = "linux", windows)))]
fn machine_guid() -> Option<String> {
    run_probe("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]).and_then(|output| {
        output
            .lines()
            .find(|line| line.contains("IOPlatformUUID"))
            .and_then(|line| line.split('"').nth(3))
            .map(String::from)
    })
}

#[cfg(not(any(target_os = "linux", windows)))]
fn bios_uuid() -> Option<String> {
    None
}

#[cfg(not(any(target_os = "linux", windows)))]
fn baseboard_serial() -> Option<String> {
    None
}
