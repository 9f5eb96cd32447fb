//! Leaf Certificate Generation Module
//!
//! Issues the server, client and Redis certificates. Each leaf goes through
//! the same two stages the openssl workflow used:
//!
//! 1. [`LeafRequestBuilder`] generates the leaf key and a certificate signing
//!    request carrying the Identity Profile with a role-specific CN.
//! 2. [`CaSigner`] checks the request and signs it with the CA key, adding
//!    the role's extensions.
//!
//! # X.509 Extensions
//! | Role | Extended Key Usage | Subject Alternative Name |
//! |---|---|---|
//! | server | serverAuth | configured DNS names and IPs |
//! | client | clientAuth | none |
//! | redis | serverAuth, clientAuth | none |
//!
//! All leaves carry `CA:FALSE`, `digitalSignature, keyEncipherment`, and
//! subject/authority key identifiers.

use crate::artifacts::Artifact;
use crate::error::{ProvisionError, Step};
use crate::generate_root_ca::{random_serial, X509_VERSION_3};
use crate::identity::IdentityProfile;
use crate::roles::{LeafRole, SanEntry};
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Req, X509};

const RSA_KEY_SIZE_DEFAULT: u32 = 4096;
const X509_REQ_VERSION_1: i32 = 0;

/// A leaf key together with its signing request.
pub struct LeafRequest {
    pub role: LeafRole,
    pub private_key: PKey<Private>,
    pub request: X509Req,
    /// Subject Alternative Names to attach when signing (server only).
    pub san: Vec<SanEntry>,
}

// ================= RSA Leaf Request Builder =================

/// Builder for a leaf key pair and certificate signing request.
pub struct LeafRequestBuilder<'a> {
    role: LeafRole,
    identity: &'a IdentityProfile,
    common_name: String,
    key_bits: u32,
    san: Vec<SanEntry>,
}

impl<'a> LeafRequestBuilder<'a> {
    pub fn new(role: LeafRole, identity: &'a IdentityProfile) -> Self {
        Self {
            role,
            identity,
            common_name: identity.common_name.clone(),
            key_bits: RSA_KEY_SIZE_DEFAULT,
            san: Vec::new(),
        }
    }

    /// Set the common name (CN) of the leaf subject
    pub fn subject_common_name(mut self, cn: impl Into<String>) -> Self {
        self.common_name = cn.into();
        self
    }

    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }

    /// Subject Alternative Names; only honoured for the server role.
    pub fn subject_alt_names(mut self, san: &[SanEntry]) -> Self {
        self.san = san.to_vec();
        self
    }

    pub fn build(self) -> Result<LeafRequest, ProvisionError> {
        let step = Step::Leaf(self.role);
        let key_artifact = Artifact::LeafKey(self.role);
        let cert_artifact = Artifact::LeafCert(self.role);

        let rsa = Rsa::generate(self.key_bits).map_err(ProvisionError::crypto(step, key_artifact))?;
        let private_key = PKey::from_rsa(rsa).map_err(ProvisionError::crypto(step, key_artifact))?;

        let subject = self.identity.subject_name(
            &self.common_name,
            &self.identity.organizational_unit,
            step,
            cert_artifact,
        )?;

        let mut builder = X509Req::builder().map_err(ProvisionError::crypto(step, cert_artifact))?;
        builder
            .set_version(X509_REQ_VERSION_1)
            .map_err(ProvisionError::crypto(step, cert_artifact))?;
        builder
            .set_subject_name(&subject)
            .map_err(|e| ProvisionError::signing(step, cert_artifact, format!("failed to set CSR subject: {}", e)))?;
        builder
            .set_pubkey(&private_key)
            .map_err(ProvisionError::crypto(step, cert_artifact))?;
        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(|e| ProvisionError::signing(step, cert_artifact, format!("failed to sign CSR: {}", e)))?;

        let san = match self.role {
            LeafRole::Server => self.san,
            LeafRole::Client | LeafRole::Redis => Vec::new(),
        };

        Ok(LeafRequest {
            role: self.role,
            private_key,
            request: builder.build(),
            san,
        })
    }
}

// ================= CA Signer =================

/// Signs leaf requests with the CA key.
pub struct CaSigner<'a> {
    ca_key: &'a PKey<Private>,
    ca_cert: &'a X509,
    validity_days: u32,
}

impl<'a> CaSigner<'a> {
    pub fn new(ca_key: &'a PKey<Private>, ca_cert: &'a X509, validity_days: u32) -> Self {
        Self {
            ca_key,
            ca_cert,
            validity_days,
        }
    }

    /// Turn a signing request into a certificate issued by the CA.
    ///
    /// # Errors
    /// [`ProvisionError::Signing`] when the request's own signature does not
    /// verify, when the CA key does not belong to the CA certificate, or
    /// when OpenSSL refuses to sign.
    pub fn sign(&self, leaf: &LeafRequest) -> Result<X509, ProvisionError> {
        let step = Step::Leaf(leaf.role);
        let artifact = Artifact::LeafCert(leaf.role);
        let crypto = || ProvisionError::crypto(step, artifact);
        let signing = |reason: String| ProvisionError::signing(step, artifact, reason);

        let request_key = leaf
            .request
            .public_key()
            .map_err(|e| signing(format!("CSR has no usable public key: {}", e)))?;
        let self_signed = leaf
            .request
            .verify(&request_key)
            .map_err(|e| signing(format!("CSR signature check failed: {}", e)))?;
        if !self_signed {
            return Err(signing("CSR signature does not verify".to_string()));
        }

        let ca_public = self
            .ca_cert
            .public_key()
            .map_err(|e| signing(format!("CA certificate has no usable public key: {}", e)))?;
        if !ca_public.public_eq(self.ca_key) {
            return Err(signing("CA key does not match CA certificate".to_string()));
        }

        let mut builder = X509::builder().map_err(crypto())?;
        builder.set_version(X509_VERSION_3).map_err(crypto())?;
        let serial = random_serial().map_err(crypto())?;
        builder.set_serial_number(&serial).map_err(crypto())?;

        builder
            .set_subject_name(leaf.request.subject_name())
            .map_err(|e| signing(format!("failed to copy CSR subject: {}", e)))?;
        builder
            .set_issuer_name(self.ca_cert.subject_name())
            .map_err(|e| signing(format!("failed to set issuer from CA: {}", e)))?;
        builder.set_pubkey(&request_key).map_err(crypto())?;

        let not_before = Asn1Time::days_from_now(0).map_err(crypto())?;
        builder.set_not_before(&not_before).map_err(crypto())?;
        let not_after = Asn1Time::days_from_now(self.validity_days).map_err(crypto())?;
        builder.set_not_after(&not_after).map_err(crypto())?;

        let bc = BasicConstraints::new()
            .critical()
            .build()
            .map_err(crypto())?;
        builder.append_extension(bc).map_err(crypto())?;

        let ku = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()
            .map_err(crypto())?;
        builder.append_extension(ku).map_err(crypto())?;

        let mut eku = ExtendedKeyUsage::new();
        match leaf.role {
            LeafRole::Server => eku.server_auth(),
            LeafRole::Client => eku.client_auth(),
            LeafRole::Redis => eku.server_auth().client_auth(),
        };
        let eku = eku.build().map_err(crypto())?;
        builder.append_extension(eku).map_err(crypto())?;

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(Some(self.ca_cert), None))
            .map_err(crypto())?;
        builder.append_extension(ski).map_err(crypto())?;

        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .issuer(false)
            .build(&builder.x509v3_context(Some(self.ca_cert), None))
            .map_err(crypto())?;
        builder.append_extension(aki).map_err(crypto())?;

        if !leaf.san.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for entry in &leaf.san {
                match entry {
                    SanEntry::Dns(name) => san.dns(name),
                    SanEntry::Ip(ip) => san.ip(&ip.to_string()),
                };
            }
            let san = san
                .build(&builder.x509v3_context(Some(self.ca_cert), None))
                .map_err(|e| signing(format!("failed to build SubjectAlternativeName: {}", e)))?;
            builder.append_extension(san).map_err(crypto())?;
        }

        builder
            .sign(self.ca_key, MessageDigest::sha256())
            .map_err(|e| signing(format!("CA signing failed: {}", e)))?;

        Ok(builder.build())
    }
}
