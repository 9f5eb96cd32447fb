//! Certificate Authority Generation Module
//!
//! Generates the self-signed CA that every leaf of the provisioned chain is
//! signed with.
//!
//! # Chain Position
//! ```text
//! CA (self-signed) ← This module
//!   ├── server
//!   ├── client
//!   └── redis
//! ```
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same
//! - **Subject**: Identity Profile, OU suffixed with ` CA`
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature
//! - **Basic Constraints**: CA=true, pathlen=0 (signs leaves only)
//! - **Default Key Size**: RSA 4096-bit
//! - **Default Validity**: 365 days
//! - **Version**: X.509v3 with extensions
//!
//! # Example
//! ```rust,no_run
//! # use pki_provision::generate_root_ca::RsaRootCABuilder;
//! # use pki_provision::identity::IdentityProfile;
//! # fn example() -> Result<(), pki_provision::ProvisionError> {
//! let profile = IdentityProfile::default();
//! let (ca_key, ca_cert) = RsaRootCABuilder::new(&profile)
//!     .key_bits(4096)
//!     .validity_days(365)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::artifacts::Artifact;
use crate::error::{ProvisionError, Step};
use crate::identity::IdentityProfile;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::X509;

pub(crate) const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
pub(crate) const SERIAL_NUMBER_BITS: i32 = 128;
const RSA_KEY_SIZE_DEFAULT: u32 = 4096;
const CA_PATH_LENGTH: u32 = 0;

const STEP: Step = Step::CertificateAuthority;

// ================= RSA CA Key and Certificate Builder =================

/// Builder for the CA key pair and its self-signed certificate.
///
/// The subject is taken from the [`IdentityProfile`]; only the
/// organizational unit is changed, to mark the certificate as the CA.
pub struct RsaRootCABuilder<'a> {
    identity: &'a IdentityProfile,
    key_bits: u32,
    validity_days: u32,
}

impl<'a> RsaRootCABuilder<'a> {
    pub fn new(identity: &'a IdentityProfile) -> Self {
        Self {
            identity,
            key_bits: RSA_KEY_SIZE_DEFAULT,
            validity_days: 365,
        }
    }

    /// Set the RSA modulus size in bits
    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }

    /// Set validity period in days
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Build the RSA key pair and self-signed CA certificate
    ///
    /// # Errors
    /// - [`ProvisionError::Crypto`] if key generation or an OpenSSL builder fails
    /// - [`ProvisionError::Signing`] if the subject cannot be built or self-signing fails
    pub fn build(self) -> Result<(PKey<Private>, X509), ProvisionError> {
        let crypto = |artifact| ProvisionError::crypto(STEP, artifact);
        let signing = |reason: String| ProvisionError::signing(STEP, Artifact::CaCert, reason);

        let rsa = Rsa::generate(self.key_bits).map_err(crypto(Artifact::CaKey))?;
        let private_key = PKey::from_rsa(rsa).map_err(crypto(Artifact::CaKey))?;

        let mut builder = X509::builder().map_err(crypto(Artifact::CaCert))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(crypto(Artifact::CaCert))?;

        let serial = random_serial().map_err(crypto(Artifact::CaCert))?;
        builder
            .set_serial_number(&serial)
            .map_err(crypto(Artifact::CaCert))?;

        let name = self.identity.subject_name(
            &self.identity.common_name,
            &self.identity.ca_organizational_unit(),
            STEP,
            Artifact::CaCert,
        )?;
        builder
            .set_subject_name(&name)
            .map_err(|e| signing(format!("failed to set subject: {}", e)))?;
        builder
            .set_issuer_name(&name)
            .map_err(|e| signing(format!("failed to set issuer: {}", e)))?;

        let not_before = Asn1Time::days_from_now(0).map_err(crypto(Artifact::CaCert))?;
        builder
            .set_not_before(&not_before)
            .map_err(crypto(Artifact::CaCert))?;
        let not_after =
            Asn1Time::days_from_now(self.validity_days).map_err(crypto(Artifact::CaCert))?;
        builder
            .set_not_after(&not_after)
            .map_err(crypto(Artifact::CaCert))?;

        builder
            .set_pubkey(&private_key)
            .map_err(crypto(Artifact::CaCert))?;

        let bc = BasicConstraints::new()
            .critical()
            .ca()
            .pathlen(CA_PATH_LENGTH)
            .build()
            .map_err(crypto(Artifact::CaCert))?;
        builder
            .append_extension(bc)
            .map_err(crypto(Artifact::CaCert))?;

        let ku = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()
            .map_err(crypto(Artifact::CaCert))?;
        builder
            .append_extension(ku)
            .map_err(crypto(Artifact::CaCert))?;

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .map_err(crypto(Artifact::CaCert))?;
        builder
            .append_extension(ski)
            .map_err(crypto(Artifact::CaCert))?;

        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(|e| signing(format!("self-signing failed: {}", e)))?;

        Ok((private_key, builder.build()))
    }
}

/// Random 128-bit serial number
pub(crate) fn random_serial() -> Result<openssl::asn1::Asn1Integer, openssl::error::ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer()
}
