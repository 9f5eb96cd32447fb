//! Chain verification.
//!
//! Re-checks the invariants a provisioning run must leave behind, either on
//! the in-memory [`CertificateBundle`] or on an output directory written by
//! an earlier run:
//!
//! - the CA key belongs to the CA certificate, which is self-signed
//! - every leaf is issued by the CA subject and its signature verifies
//!   against the CA public key
//! - every leaf key belongs to its certificate and is not the CA key
//! - (directory only) file modes follow the permission policy and the DH
//!   parameters are usable

use crate::artifacts::Artifact;
use crate::dh_params;
use crate::error::{ProvisionError, Step};
use crate::identity::{describe_name, names_equal};
use crate::provisioner::CertificateBundle;
use crate::roles::{LeafRole, SanEntry};
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509, X509Ref};
use serde::Serialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// Outcome of a single check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    pub artifact: String,
    pub check: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub checks: Vec<CheckResult>,
}

impl VerifyReport {
    pub fn is_success(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    fn record(&mut self, artifact: Artifact, check: &'static str, passed: bool, detail: Option<String>) {
        self.checks.push(CheckResult {
            artifact: artifact.file_name(),
            check,
            passed,
            detail,
        });
    }

    fn pass(&mut self, artifact: Artifact, check: &'static str) {
        self.record(artifact, check, true, None);
    }

    fn fail(&mut self, artifact: Artifact, check: &'static str, detail: impl Into<String>) {
        self.record(artifact, check, false, Some(detail.into()));
    }

    fn check(&mut self, artifact: Artifact, check: &'static str, result: Result<bool, String>) {
        match result {
            Ok(true) => self.pass(artifact, check),
            Ok(false) => self.fail(artifact, check, "check did not hold"),
            Err(detail) => self.fail(artifact, check, detail),
        }
    }
}

/// Subject Alternative Names of a certificate, in extension order.
pub fn subject_alt_names(cert: &X509Ref) -> Vec<SanEntry> {
    let Some(names) = cert.subject_alt_names() else {
        return Vec::new();
    };
    names
        .iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                return Some(SanEntry::Dns(dns.to_string()));
            }
            name.ipaddress().and_then(ip_from_bytes).map(SanEntry::Ip)
        })
        .collect()
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

fn check_ca(report: &mut VerifyReport, ca_cert: &X509Ref, ca_key: Option<&PKey<Private>>) {
    report.check(
        Artifact::CaCert,
        "self-signed",
        if names_equal(ca_cert.subject_name(), ca_cert.issuer_name()) {
            ca_cert
                .public_key()
                .and_then(|public| ca_cert.verify(&public))
                .map_err(|e| e.to_string())
        } else {
            Ok(false)
        },
    );
    if let Some(ca_key) = ca_key {
        report.check(
            Artifact::CaKey,
            "key matches certificate",
            ca_cert
                .public_key()
                .map(|public| public.public_eq(ca_key))
                .map_err(|e| e.to_string()),
        );
    }
}

fn check_leaf(
    report: &mut VerifyReport,
    role: LeafRole,
    ca_cert: &X509Ref,
    ca_key: Option<&PKey<Private>>,
    cert: &X509Ref,
    key: Option<&PKey<Private>>,
) {
    let cert_artifact = Artifact::LeafCert(role);
    let key_artifact = Artifact::LeafKey(role);

    if names_equal(cert.issuer_name(), ca_cert.subject_name()) {
        report.pass(cert_artifact, "issuer is CA subject");
    } else {
        report.fail(
            cert_artifact,
            "issuer is CA subject",
            format!(
                "issuer [{}] differs from CA subject [{}]",
                describe_name(cert.issuer_name()),
                describe_name(ca_cert.subject_name())
            ),
        );
    }

    report.check(
        cert_artifact,
        "signature verifies against CA",
        ca_cert
            .public_key()
            .and_then(|ca_public| cert.verify(&ca_public))
            .map_err(|e| e.to_string()),
    );

    if let Some(key) = key {
        report.check(
            key_artifact,
            "key matches certificate",
            cert.public_key()
                .map(|public| public.public_eq(key))
                .map_err(|e| e.to_string()),
        );
        let reused = match ca_key {
            Some(ca_key) => ca_key.public_eq(key),
            None => ca_cert
                .public_key()
                .map(|ca_public| ca_public.public_eq(key))
                .unwrap_or(false),
        };
        if reused {
            report.fail(key_artifact, "distinct from CA key", "leaf key is the CA key");
        } else {
            report.pass(key_artifact, "distinct from CA key");
        }
    }
}

/// Verify an in-memory provisioning result.
pub fn verify_bundle(bundle: &CertificateBundle) -> VerifyReport {
    let mut report = VerifyReport::default();
    check_ca(&mut report, &bundle.ca.certificate, Some(&bundle.ca.private_key));
    for (role, leaf) in &bundle.leaves {
        check_leaf(
            &mut report,
            *role,
            &bundle.ca.certificate,
            Some(&bundle.ca.private_key),
            &leaf.certificate,
            Some(&leaf.private_key),
        );
    }
    report
}

fn read_cert(path: &Path) -> Result<X509, String> {
    let pem = fs::read(path).map_err(|e| e.to_string())?;
    X509::from_pem(&pem).map_err(|e| format!("not a PEM certificate: {}", e))
}

enum LoadedKey {
    Plain(PKey<Private>),
    Encrypted,
}

fn read_key(path: &Path) -> Result<LoadedKey, String> {
    let pem = fs::read(path).map_err(|e| e.to_string())?;
    if pem
        .windows(b"ENCRYPTED PRIVATE KEY".len())
        .any(|w| w == b"ENCRYPTED PRIVATE KEY")
    {
        return Ok(LoadedKey::Encrypted);
    }
    PKey::private_key_from_pem(&pem)
        .map(LoadedKey::Plain)
        .map_err(|e| format!("not a PEM private key: {}", e))
}

#[cfg(unix)]
fn check_mode(report: &mut VerifyReport, artifact: Artifact, path: &Path) {
    match crate::artifacts::file_mode(path) {
        Ok(mode) if mode == artifact.mode() => report.pass(artifact, "file mode"),
        Ok(mode) => report.fail(
            artifact,
            "file mode",
            format!("mode is {:o}, expected {:o}", mode, artifact.mode()),
        ),
        Err(e) => report.fail(artifact, "file mode", e.to_string()),
    }
}

#[cfg(not(unix))]
fn check_mode(_report: &mut VerifyReport, _artifact: Artifact, _path: &Path) {}

/// Verify the artifacts found in an output directory.
///
/// `ca.crt` is required; leaves and the DH file are checked when present.
/// An encrypted `ca.key` is recognised but not opened.
pub fn verify_directory(dir: &Path) -> Result<VerifyReport, ProvisionError> {
    let mut report = VerifyReport::default();

    let ca_cert_path = Artifact::CaCert.path_in(dir);
    if !ca_cert_path.exists() {
        return Err(ProvisionError::io(Step::Verification, &ca_cert_path)(
            std::io::Error::new(std::io::ErrorKind::NotFound, "CA certificate not found"),
        ));
    }
    let ca_cert = match read_cert(&ca_cert_path) {
        Ok(cert) => cert,
        Err(detail) => {
            report.fail(Artifact::CaCert, "parse", detail);
            return Ok(report);
        }
    };
    check_mode(&mut report, Artifact::CaCert, &ca_cert_path);

    let ca_key_path = Artifact::CaKey.path_in(dir);
    let mut ca_key = None;
    if ca_key_path.exists() {
        check_mode(&mut report, Artifact::CaKey, &ca_key_path);
        match read_key(&ca_key_path) {
            Ok(LoadedKey::Plain(key)) => ca_key = Some(key),
            Ok(LoadedKey::Encrypted) => {
                tracing::debug!("ca.key is encrypted, skipping key pairing check");
            }
            Err(detail) => report.fail(Artifact::CaKey, "parse", detail),
        }
    }
    check_ca(&mut report, &ca_cert, ca_key.as_ref());

    for role in LeafRole::ALL {
        let cert_path = Artifact::LeafCert(role).path_in(dir);
        if !cert_path.exists() {
            continue;
        }
        check_mode(&mut report, Artifact::LeafCert(role), &cert_path);
        let cert = match read_cert(&cert_path) {
            Ok(cert) => cert,
            Err(detail) => {
                report.fail(Artifact::LeafCert(role), "parse", detail);
                continue;
            }
        };

        let key_path = Artifact::LeafKey(role).path_in(dir);
        let key = if key_path.exists() {
            check_mode(&mut report, Artifact::LeafKey(role), &key_path);
            match read_key(&key_path) {
                Ok(LoadedKey::Plain(key)) => Some(key),
                Ok(LoadedKey::Encrypted) => None,
                Err(detail) => {
                    report.fail(Artifact::LeafKey(role), "parse", detail);
                    None
                }
            }
        } else {
            report.fail(Artifact::LeafKey(role), "present", "certificate has no key file");
            None
        };

        check_leaf(&mut report, role, &ca_cert, ca_key.as_ref(), &cert, key.as_ref());
    }

    let dh_path = Artifact::DhParams.path_in(dir);
    if dh_path.exists() {
        check_mode(&mut report, Artifact::DhParams, &dh_path);
        let parsed = fs::read(&dh_path)
            .map_err(|e| e.to_string())
            .and_then(|pem| dh_params::parse_pem(&pem));
        match parsed {
            Ok(_) => report.pass(Artifact::DhParams, "usable parameters"),
            Err(detail) => report.fail(Artifact::DhParams, "usable parameters", detail),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_from_bytes() {
        assert_eq!(
            ip_from_bytes(&[127, 0, 0, 1]),
            Some("127.0.0.1".parse().unwrap())
        );
        let mut v6 = [0u8; 16];
        v6[15] = 1;
        assert_eq!(ip_from_bytes(&v6), Some("::1".parse().unwrap()));
        assert_eq!(ip_from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn test_report_success_and_failures() {
        let mut report = VerifyReport::default();
        report.pass(Artifact::CaCert, "self-signed");
        assert!(report.is_success());
        report.fail(Artifact::CaKey, "file mode", "mode is 644, expected 600");
        assert!(!report.is_success());
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].artifact, "ca.key");

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"check\":\"file mode\""));
    }

    #[test]
    fn test_missing_ca_certificate_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_directory(dir.path()).unwrap_err();
        assert_eq!(err.step(), Some(Step::Verification));
    }
}
