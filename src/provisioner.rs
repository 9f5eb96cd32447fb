//! The provisioning pipeline.
//!
//! ```text
//! 1. CA key + self-signed CA        → ca.key, ca.crt
//! 2. leaf key + CSR + CA signature  → server.*, client.*, redis.* (independent)
//! 3. redis copy of the server pair  → redis.* (copy-server)
//! 4. DH parameters                  → dhparam.pem
//! 5. permission policy              → 0600 keys, 0644 everything else
//! ```
//!
//! Each step needs the previous step's output, so the run is strictly
//! sequential. Artifacts are written as soon as their step produces them
//! and nothing is rolled back on failure: a run that fails in step 4 leaves
//! the CA and leaf files of steps 1-2 in the output directory.
//!
//! Concurrent runs against the same directory are not supported; the last
//! writer wins.

use crate::artifacts::{self, Artifact, WrittenArtifact};
use crate::configs::ProvisionConfig;
use crate::dh_params;
use crate::error::{ProvisionError, Step};
use crate::generate_leaf::{CaSigner, LeafRequestBuilder};
use crate::generate_root_ca::RsaRootCABuilder;
use crate::identity::describe_name;
use crate::roles::{LeafRole, RedisPolicy};
use openssl::dh::Dh;
use openssl::pkey::{Params, PKey, Private};
use openssl::symm::Cipher;
use openssl::x509::X509;
use secrecy::ExposeSecret;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A private key with the certificate issued for it.
#[derive(Clone)]
pub struct IssuedCertificate {
    pub private_key: PKey<Private>,
    pub certificate: X509,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("subject", &describe_name(self.certificate.subject_name()))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Everything one provisioning run produced.
pub struct CertificateBundle {
    pub output_dir: PathBuf,
    pub ca: IssuedCertificate,
    pub leaves: BTreeMap<LeafRole, IssuedCertificate>,
    pub dh_params: Dh<Params>,
    pub files: Vec<WrittenArtifact>,
}

impl CertificateBundle {
    pub fn leaf(&self, role: LeafRole) -> Option<&IssuedCertificate> {
        self.leaves.get(&role)
    }

    pub fn path_of(&self, artifact: Artifact) -> Option<&Path> {
        self.files
            .iter()
            .find(|f| f.artifact == artifact)
            .map(|f| f.path.as_path())
    }
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("output_dir", &self.output_dir)
            .field("ca", &self.ca)
            .field("leaves", &self.leaves)
            .field("dh_bits", &dh_params::prime_bits(&self.dh_params))
            .field("files", &self.files.len())
            .finish()
    }
}

/// Run the full pipeline for `config`, writing into `output_dir`.
pub fn provision(
    config: &ProvisionConfig,
    output_dir: &Path,
) -> Result<CertificateBundle, ProvisionError> {
    Provisioner::new(config, output_dir).run()
}

struct Provisioner<'a> {
    config: &'a ProvisionConfig,
    output_dir: &'a Path,
    files: Vec<WrittenArtifact>,
}

impl<'a> Provisioner<'a> {
    fn new(config: &'a ProvisionConfig, output_dir: &'a Path) -> Self {
        Self {
            config,
            output_dir,
            files: Vec::new(),
        }
    }

    fn run(mut self) -> Result<CertificateBundle, ProvisionError> {
        tracing::info!(dir = %self.output_dir.display(), "provisioning certificate chain");
        artifacts::ensure_output_dir(self.output_dir)?;

        let config = self.config;
        let ca = self.certificate_authority()?;

        let mut leaves = BTreeMap::new();
        for role in config.roles.iter().copied() {
            if role == LeafRole::Redis && config.redis_policy == RedisPolicy::CopyServer {
                continue;
            }
            let leaf = self.issue_leaf(role, &ca)?;
            leaves.insert(role, leaf);
        }

        if config.requests(LeafRole::Redis) && config.redis_policy == RedisPolicy::CopyServer {
            let server = leaves.get(&LeafRole::Server).cloned().ok_or_else(|| {
                ProvisionError::Config(
                    "redis policy copy-server requires the server role to be requested".to_string(),
                )
            })?;
            self.copy_server_to_redis(&server)?;
            leaves.insert(LeafRole::Redis, server);
        }

        let dh_params = self.dh_parameters()?;

        tracing::info!(step = %Step::Permissions, files = self.files.len(), "applying permission policy");
        artifacts::enforce_permissions(&self.files)?;

        tracing::info!(
            dir = %self.output_dir.display(),
            files = self.files.len(),
            "certificate chain provisioned"
        );
        Ok(CertificateBundle {
            output_dir: self.output_dir.to_path_buf(),
            ca,
            leaves,
            dh_params,
            files: self.files,
        })
    }

    fn write(
        &mut self,
        artifact: Artifact,
        contents: &[u8],
        step: Step,
    ) -> Result<(), ProvisionError> {
        let written = artifacts::write_artifact(self.output_dir, artifact, contents, step)?;
        self.files.push(written);
        Ok(())
    }

    fn certificate_authority(&mut self) -> Result<IssuedCertificate, ProvisionError> {
        let step = Step::CertificateAuthority;
        tracing::info!(%step, bits = self.config.ca_key_bits, "generating CA");

        let config = self.config;
        let (private_key, certificate) = RsaRootCABuilder::new(&config.identity)
            .key_bits(config.ca_key_bits)
            .validity_days(config.validity_days)
            .build()?;

        let key_pem = match &config.ca_key_passphrase {
            Some(passphrase) => private_key.private_key_to_pem_pkcs8_passphrase(
                Cipher::aes_256_cbc(),
                passphrase.expose_secret().as_bytes(),
            ),
            None => private_key.private_key_to_pem_pkcs8(),
        }
        .map_err(ProvisionError::crypto(step, Artifact::CaKey))?;
        let cert_pem = certificate
            .to_pem()
            .map_err(ProvisionError::crypto(step, Artifact::CaCert))?;

        self.write(Artifact::CaKey, &key_pem, step)?;
        self.write(Artifact::CaCert, &cert_pem, step)?;

        tracing::info!(subject = %describe_name(certificate.subject_name()), "CA ready");
        Ok(IssuedCertificate {
            private_key,
            certificate,
        })
    }

    fn issue_leaf(
        &mut self,
        role: LeafRole,
        ca: &IssuedCertificate,
    ) -> Result<IssuedCertificate, ProvisionError> {
        let step = Step::Leaf(role);
        tracing::info!(%step, bits = self.config.leaf_key_bits, "issuing leaf certificate");

        let config = self.config;
        let request = LeafRequestBuilder::new(role, &config.identity)
            .subject_common_name(config.leaf_common_name(role))
            .key_bits(config.leaf_key_bits)
            .subject_alt_names(&config.server_san)
            .build()?;
        let certificate =
            CaSigner::new(&ca.private_key, &ca.certificate, config.validity_days).sign(&request)?;

        let key_pem = request
            .private_key
            .private_key_to_pem_pkcs8()
            .map_err(ProvisionError::crypto(step, Artifact::LeafKey(role)))?;
        let cert_pem = certificate
            .to_pem()
            .map_err(ProvisionError::crypto(step, Artifact::LeafCert(role)))?;

        self.write(Artifact::LeafKey(role), &key_pem, step)?;
        self.write(Artifact::LeafCert(role), &cert_pem, step)?;

        if !request.san.is_empty() {
            let san: Vec<String> = request.san.iter().map(|s| s.to_string()).collect();
            tracing::debug!(role = %role, san = %san.join(", "), "subject alternative names attached");
        }
        Ok(IssuedCertificate {
            private_key: request.private_key,
            certificate,
        })
    }

    fn copy_server_to_redis(&mut self, server: &IssuedCertificate) -> Result<(), ProvisionError> {
        let step = Step::RedisCopy;
        tracing::warn!(
            %step,
            "redis reuses the server key and certificate; use the independent policy to give it its own key"
        );

        let key_pem = server
            .private_key
            .private_key_to_pem_pkcs8()
            .map_err(ProvisionError::crypto(step, Artifact::LeafKey(LeafRole::Redis)))?;
        let cert_pem = server
            .certificate
            .to_pem()
            .map_err(ProvisionError::crypto(step, Artifact::LeafCert(LeafRole::Redis)))?;

        self.write(Artifact::LeafKey(LeafRole::Redis), &key_pem, step)?;
        self.write(Artifact::LeafCert(LeafRole::Redis), &cert_pem, step)?;
        Ok(())
    }

    fn dh_parameters(&mut self) -> Result<Dh<Params>, ProvisionError> {
        let step = Step::DhParameters;
        tracing::info!(%step, "preparing DH parameters");

        let dh = dh_params::obtain(&self.config.dh)?;
        let pem = dh_params::to_pem(&dh)?;
        self.write(Artifact::DhParams, &pem, step)?;
        Ok(dh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::{AppConfig, DhSource};

    fn small_config(dir: &Path) -> ProvisionConfig {
        let dh_path = dir.join("fixture-dh.pem");
        std::fs::write(&dh_path, Dh::get_2048_256().unwrap().params_to_pem().unwrap()).unwrap();

        let mut app = AppConfig::default();
        app.provisioning.ca_key_bits = 2048;
        app.provisioning.leaf_key_bits = 2048;
        app.provisioning.roles = vec![LeafRole::Server];
        app.provisioning.dh_params_path = Some(dh_path);
        let config = ProvisionConfig::try_from(app).unwrap();
        assert!(matches!(config.dh, DhSource::Import(_)));
        config
    }

    #[test]
    fn test_debug_no_leak() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let bundle = provision(&config, &dir.path().join("out")).unwrap();

        let key_pem =
            String::from_utf8(bundle.ca.private_key.private_key_to_pem_pkcs8().unwrap()).unwrap();
        let debug_str = format!("{:?}", bundle);
        // Ensure no key material appears in debug output
        assert!(!debug_str.contains(key_pem.lines().nth(1).unwrap()));
        assert!(debug_str.contains("<redacted>"));
        assert!(debug_str.contains("dh_bits: 2048"));
    }

    #[test]
    fn test_bundle_records_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let out = dir.path().join("nested").join("out");
        let bundle = provision(&config, &out).unwrap();

        assert_eq!(bundle.files.len(), 5);
        assert_eq!(
            bundle.path_of(Artifact::LeafCert(LeafRole::Server)),
            Some(out.join("server.crt").as_path())
        );
        assert!(bundle.path_of(Artifact::LeafKey(LeafRole::Client)).is_none());
        assert!(bundle.leaf(LeafRole::Server).is_some());
    }
}
