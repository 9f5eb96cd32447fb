//! Output artifacts: fixed file names and the permission policy.
//!
//! External consumers (trust installation, worker packaging) look for these
//! exact names in the output directory:
//!
//! | Artifact | File | Mode |
//! |---|---|---|
//! | CA private key | `ca.key` | 0600 |
//! | CA certificate | `ca.crt` | 0644 |
//! | Leaf private key | `<role>.key` | 0600 |
//! | Leaf certificate | `<role>.crt` | 0644 |
//! | DH parameters | `dhparam.pem` | 0644 |
//!
//! Private keys are created with 0600, and a file left over from an earlier
//! run has its mode reset on the open handle before any bytes are written, so
//! a key is never world-readable while the run is in progress. The final
//! permission step then forces every mode again.

use crate::error::{ProvisionError, Step};
use crate::roles::LeafRole;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CA_KEY_FILE: &str = "ca.key";
pub const CA_CERT_FILE: &str = "ca.crt";
pub const DH_PARAMS_FILE: &str = "dhparam.pem";

pub const PRIVATE_KEY_MODE: u32 = 0o600;
pub const PUBLIC_FILE_MODE: u32 = 0o644;

/// One file the provisioner writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    CaKey,
    CaCert,
    LeafKey(LeafRole),
    LeafCert(LeafRole),
    DhParams,
}

impl Artifact {
    pub fn file_name(self) -> String {
        match self {
            Artifact::CaKey => CA_KEY_FILE.to_string(),
            Artifact::CaCert => CA_CERT_FILE.to_string(),
            Artifact::LeafKey(role) => format!("{}.key", role.file_stem()),
            Artifact::LeafCert(role) => format!("{}.crt", role.file_stem()),
            Artifact::DhParams => DH_PARAMS_FILE.to_string(),
        }
    }

    pub fn is_private_key(self) -> bool {
        matches!(self, Artifact::CaKey | Artifact::LeafKey(_))
    }

    /// Unix mode required by the permission policy.
    pub fn mode(self) -> u32 {
        if self.is_private_key() {
            PRIVATE_KEY_MODE
        } else {
            PUBLIC_FILE_MODE
        }
    }

    pub fn path_in(self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// A file written during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    pub artifact: Artifact,
    pub path: PathBuf,
}

pub(crate) fn ensure_output_dir(dir: &Path) -> Result<(), ProvisionError> {
    fs::create_dir_all(dir).map_err(ProvisionError::io(Step::CertificateAuthority, dir))
}

/// Write `contents` to the artifact's fixed name inside `dir`, replacing any previous file.
pub(crate) fn write_artifact(
    dir: &Path,
    artifact: Artifact,
    contents: &[u8],
    step: Step,
) -> Result<WrittenArtifact, ProvisionError> {
    let path = artifact.path_in(dir);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(artifact.mode());
    }

    let mut file = options
        .open(&path)
        .map_err(ProvisionError::io(step, &path))?;
    // `mode` only applies on creation; an existing file keeps its old bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(artifact.mode()))
            .map_err(ProvisionError::io(step, &path))?;
    }
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .map_err(ProvisionError::io(step, &path))?;

    tracing::debug!(file = %path.display(), bytes = contents.len(), "artifact written");
    Ok(WrittenArtifact { artifact, path })
}

/// Force the policy mode on every written artifact.
pub(crate) fn enforce_permissions(written: &[WrittenArtifact]) -> Result<(), ProvisionError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for entry in written {
            fs::set_permissions(&entry.path, fs::Permissions::from_mode(entry.artifact.mode()))
                .map_err(ProvisionError::io(Step::Permissions, &entry.path))?;
        }
    }
    #[cfg(not(unix))]
    {
        tracing::warn!(
            files = written.len(),
            "file permission policy is only enforced on Unix"
        );
    }
    Ok(())
}

/// Current permission bits of `path`, masked to `0o777`.
#[cfg(unix)]
pub fn file_mode(path: &Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_file_names() {
        assert_eq!(Artifact::CaKey.file_name(), "ca.key");
        assert_eq!(Artifact::CaCert.file_name(), "ca.crt");
        assert_eq!(Artifact::LeafKey(LeafRole::Server).file_name(), "server.key");
        assert_eq!(Artifact::LeafCert(LeafRole::Redis).file_name(), "redis.crt");
        assert_eq!(Artifact::DhParams.file_name(), "dhparam.pem");
    }

    #[test]
    fn test_modes_follow_key_policy() {
        assert_eq!(Artifact::CaKey.mode(), 0o600);
        assert_eq!(Artifact::LeafKey(LeafRole::Client).mode(), 0o600);
        assert_eq!(Artifact::CaCert.mode(), 0o644);
        assert_eq!(Artifact::DhParams.mode(), 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_and_enforce_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_artifact(
            dir.path(),
            Artifact::CaKey,
            b"key",
            Step::CertificateAuthority,
        )
        .unwrap();
        let cert = write_artifact(
            dir.path(),
            Artifact::CaCert,
            b"cert",
            Step::CertificateAuthority,
        )
        .unwrap();
        enforce_permissions(&[key.clone(), cert.clone()]).unwrap();

        assert_eq!(file_mode(&key.path).unwrap(), 0o600);
        assert_eq!(file_mode(&cert.path).unwrap(), 0o644);
        assert_eq!(fs::read(&cert.path).unwrap(), b"cert");
    }

    #[cfg(unix)]
    #[test]
    fn test_enforce_tightens_preexisting_key_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.key");
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();

        let written = write_artifact(
            dir.path(),
            Artifact::LeafKey(LeafRole::Server),
            b"new",
            Step::Leaf(LeafRole::Server),
        )
        .unwrap();
        enforce_permissions(&[written]).unwrap();

        assert_eq!(file_mode(&path).unwrap(), 0o600);
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_tightens_key_before_permission_step() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.key");
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        write_artifact(dir.path(), Artifact::CaKey, b"new", Step::CertificateAuthority).unwrap();

        assert_eq!(file_mode(&path).unwrap(), 0o600);
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_write_into_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = write_artifact(&missing, Artifact::DhParams, b"x", Step::DhParameters)
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Io {
                step: Step::DhParameters,
                ..
            }
        ));
    }
}
