//! PKI Provision - Certificate Chain Provisioner Library
//!
//! Builds the certificate set a development or production deployment needs:
//! one self-signed CA, leaf certificates for the server, the client and Redis,
//! and a Diffie-Hellman parameter file. Everything is written to one output
//! directory with fixed names and a fixed permission policy.
//!
//! # Overview
//!
//! ```text
//! CA (self-signed, pathlen=0)         ca.key  ca.crt
//!   ├── server (serverAuth, SAN)      server.key  server.crt
//!   ├── client (clientAuth)           client.key  client.crt
//!   └── redis  (copy of server, or    redis.key   redis.crt
//!               its own leaf)
//! DH parameters (independent)         dhparam.pem
//! ```
//!
//! All cryptography goes through the `openssl` crate. Nothing is shelled
//! out.
//!
//! # Example
//!
//! ```no_run
//! use pki_provision::configs::{AppConfig, ProvisionConfig};
//! use pki_provision::provisioner::provision;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut app = AppConfig::default();
//!     app.identity.organization = "Example".to_string();
//!     app.provisioning.server_san = vec!["localhost".into(), "127.0.0.1".into()];
//!
//!     let config = ProvisionConfig::try_from(app)?;
//!     let bundle = provision(&config, Path::new("certs"))?;
//!
//!     let report = pki_provision::verify::verify_bundle(&bundle);
//!     assert!(report.is_success());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`configs`]: TOML configuration, defaults and validation into [`ProvisionConfig`]
//! - [`identity`]: Identity Profile and subject names
//! - [`generate_root_ca`]: CA key pair and self-signed certificate
//! - [`generate_leaf`]: leaf key pairs, signing requests and CA signing
//! - [`dh_params`]: DH parameter generation and import
//! - [`artifacts`]: output file names and permissions
//! - [`provisioner`]: the sequential pipeline
//! - [`verify`]: chain and permission checks on a bundle or directory
//!
//! # Error Handling
//!
//! Library calls return [`ProvisionError`]. Its message names the failing
//! step and artifact, for example
//! `step 2 (server certificate): failed to sign server.crt: CA key does not match CA certificate`.

pub mod artifacts;
pub mod configs;
pub mod dh_params;
pub mod error;
pub mod generate_leaf;
pub mod generate_root_ca;
pub mod identity;
pub mod provisioner;
pub mod roles;
pub mod verify;

pub use configs::ProvisionConfig;
pub use error::{ProvisionError, Step};
pub use provisioner::{provision, CertificateBundle, IssuedCertificate};
pub use roles::{LeafRole, RedisPolicy, SanEntry};
