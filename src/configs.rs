//! Configuration: the optional TOML file, its defaults, and validation into
//! an immutable [`ProvisionConfig`].
//!
//! ```toml
//! [identity]
//! country = "IT"
//! organization = "Example"
//! common_name = "localhost"
//!
//! [provisioning]
//! validity_days = 365
//! server_san = ["localhost", "127.0.0.1"]
//! roles = ["server", "client", "redis"]
//! redis_policy = "copy-server"
//! ```

use crate::error::ProvisionError;
use crate::identity::IdentityProfile;
use crate::roles::{LeafRole, RedisPolicy, SanEntry};
use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const MIN_RSA_KEY_BITS: u32 = 2048;
pub const MIN_DH_BITS: u32 = 2048;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub identity: IdentityProfile,
    #[serde(default)]
    pub provisioning: ProvisioningSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvisioningSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    #[serde(default = "default_ca_key_bits")]
    pub ca_key_bits: u32,
    #[serde(default = "default_leaf_key_bits")]
    pub leaf_key_bits: u32,
    #[serde(default = "default_dh_bits")]
    pub dh_bits: u32,
    /// Import DH parameters from this PEM file instead of generating them.
    #[serde(default)]
    pub dh_params_path: Option<PathBuf>,
    #[serde(default = "default_server_san")]
    pub server_san: Vec<String>,
    #[serde(default = "default_roles")]
    pub roles: Vec<LeafRole>,
    #[serde(default)]
    pub redis_policy: RedisPolicy,
    #[serde(default = "default_client_common_name")]
    pub client_common_name: String,
    #[serde(default = "default_redis_common_name")]
    pub redis_common_name: String,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            validity_days: default_validity_days(),
            ca_key_bits: default_ca_key_bits(),
            leaf_key_bits: default_leaf_key_bits(),
            dh_bits: default_dh_bits(),
            dh_params_path: None,
            server_san: default_server_san(),
            roles: default_roles(),
            redis_policy: RedisPolicy::default(),
            client_common_name: default_client_common_name(),
            redis_common_name: default_redis_common_name(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_validity_days() -> u32 {
    365
}

fn default_ca_key_bits() -> u32 {
    4096
}

fn default_leaf_key_bits() -> u32 {
    4096
}

fn default_dh_bits() -> u32 {
    2048
}

fn default_server_san() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

fn default_roles() -> Vec<LeafRole> {
    LeafRole::ALL.to_vec()
}

fn default_client_common_name() -> String {
    "client".to_string()
}

fn default_redis_common_name() -> String {
    "redis".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        Ok(config)
    }

    /// Load `path` if given, otherwise fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

/// Where the DH parameter set comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhSource {
    Generate { bits: u32 },
    Import(PathBuf),
}

/// Validated, immutable provisioning configuration.
#[derive(Debug)]
pub struct ProvisionConfig {
    pub identity: IdentityProfile,
    pub validity_days: u32,
    pub ca_key_bits: u32,
    pub leaf_key_bits: u32,
    pub dh: DhSource,
    pub server_san: Vec<SanEntry>,
    /// Requested leaf roles, deduplicated, in issuance order.
    pub roles: BTreeSet<LeafRole>,
    pub redis_policy: RedisPolicy,
    pub client_common_name: String,
    pub redis_common_name: String,
    /// Encrypts `ca.key` as PKCS#8 when set.
    pub ca_key_passphrase: Option<SecretString>,
}

impl ProvisionConfig {
    pub fn with_ca_key_passphrase(mut self, passphrase: SecretString) -> Self {
        self.ca_key_passphrase = Some(passphrase);
        self
    }

    pub fn requests(&self, role: LeafRole) -> bool {
        self.roles.contains(&role)
    }

    /// Common name for a leaf role's subject.
    pub fn leaf_common_name(&self, role: LeafRole) -> &str {
        match role {
            LeafRole::Server => &self.identity.common_name,
            LeafRole::Client => &self.client_common_name,
            LeafRole::Redis => &self.redis_common_name,
        }
    }
}

impl TryFrom<AppConfig> for ProvisionConfig {
    type Error = ProvisionError;

    fn try_from(config: AppConfig) -> Result<Self, Self::Error> {
        let AppConfig {
            identity,
            provisioning: settings,
        } = config;
        let invalid = |msg: String| Err(ProvisionError::Config(msg));

        if identity.country.len() != 2 || !identity.country.chars().all(|c| c.is_ascii_alphabetic())
        {
            return invalid(format!(
                "country must be a 2-letter ISO code, got {:?}",
                identity.country
            ));
        }
        if identity.common_name.trim().is_empty() {
            return invalid("common name must not be empty".to_string());
        }
        if settings.validity_days == 0 {
            return invalid("validity_days must be at least 1".to_string());
        }
        for (what, bits) in [
            ("ca_key_bits", settings.ca_key_bits),
            ("leaf_key_bits", settings.leaf_key_bits),
        ] {
            if bits < MIN_RSA_KEY_BITS {
                return invalid(format!(
                    "{} must be at least {}, got {}",
                    what, MIN_RSA_KEY_BITS, bits
                ));
            }
        }

        let dh = match settings.dh_params_path {
            Some(path) => DhSource::Import(path),
            None if settings.dh_bits < MIN_DH_BITS => {
                return invalid(format!(
                    "dh_bits must be at least {}, got {}",
                    MIN_DH_BITS, settings.dh_bits
                ));
            }
            None => DhSource::Generate {
                bits: settings.dh_bits,
            },
        };

        let mut server_san = Vec::with_capacity(settings.server_san.len());
        for raw in &settings.server_san {
            let entry: SanEntry = raw.parse().map_err(ProvisionError::Config)?;
            if !server_san.contains(&entry) {
                server_san.push(entry);
            }
        }

        let roles: BTreeSet<LeafRole> = settings.roles.into_iter().collect();
        if roles.is_empty() {
            return invalid("at least one leaf role must be requested".to_string());
        }
        if roles.contains(&LeafRole::Redis)
            && settings.redis_policy == RedisPolicy::CopyServer
            && !roles.contains(&LeafRole::Server)
        {
            return invalid(
                "redis policy copy-server requires the server role to be requested".to_string(),
            );
        }
        for (role, cn) in [
            (LeafRole::Client, &settings.client_common_name),
            (LeafRole::Redis, &settings.redis_common_name),
        ] {
            if roles.contains(&role) && cn.trim().is_empty() {
                return invalid(format!("{} common name must not be empty", role));
            }
        }

        Ok(ProvisionConfig {
            identity,
            validity_days: settings.validity_days,
            ca_key_bits: settings.ca_key_bits,
            leaf_key_bits: settings.leaf_key_bits,
            dh,
            server_san,
            roles,
            redis_policy: settings.redis_policy,
            client_common_name: settings.client_common_name,
            redis_common_name: settings.redis_common_name,
            ca_key_passphrase: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(config: AppConfig) -> Result<ProvisionConfig, ProvisionError> {
        ProvisionConfig::try_from(config)
    }

    #[test]
    fn test_defaults() {
        let config = validate(AppConfig::default()).unwrap();
        assert_eq!(config.validity_days, 365);
        assert_eq!(config.ca_key_bits, 4096);
        assert_eq!(config.dh, DhSource::Generate { bits: 2048 });
        assert_eq!(config.roles.len(), 3);
        assert_eq!(config.redis_policy, RedisPolicy::CopyServer);
        assert_eq!(
            config.server_san,
            vec![
                SanEntry::Dns("localhost".to_string()),
                SanEntry::Ip("127.0.0.1".parse().unwrap())
            ]
        );
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            [identity]
            country = "IT"
            organization = "Example"
            common_name = "api.example.it"

            [provisioning]
            validity_days = 30
            roles = ["server", "redis"]
            redis_policy = "independent"
            dh_params_path = "/etc/ssl/dhparam.pem"
            "#,
        )
        .unwrap();

        assert_eq!(config.identity.organization, "Example");
        assert_eq!(config.identity.state, "Lombardia");
        let config = validate(config).unwrap();
        assert_eq!(config.validity_days, 30);
        assert!(!config.requests(LeafRole::Client));
        assert_eq!(config.redis_policy, RedisPolicy::Independent);
        assert_eq!(
            config.dh,
            DhSource::Import(PathBuf::from("/etc/ssl/dhparam.pem"))
        );
        assert_eq!(config.leaf_common_name(LeafRole::Server), "api.example.it");
    }

    #[test]
    fn test_rejects_weak_keys() {
        let mut config = AppConfig::default();
        config.provisioning.ca_key_bits = 1024;
        let err = validate(config).unwrap_err();
        assert!(err.to_string().contains("ca_key_bits"));

        let mut config = AppConfig::default();
        config.provisioning.dh_bits = 1024;
        assert!(matches!(validate(config), Err(ProvisionError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_identity_and_validity() {
        let mut config = AppConfig::default();
        config.identity.country = "ITA".to_string();
        assert!(validate(config).is_err());

        let mut config = AppConfig::default();
        config.identity.common_name = "  ".to_string();
        assert!(validate(config).is_err());

        let mut config = AppConfig::default();
        config.provisioning.validity_days = 0;
        assert!(validate(config).is_err());
    }

    #[test]
    fn test_copy_server_requires_server_role() {
        let mut config = AppConfig::default();
        config.provisioning.roles = vec![LeafRole::Client, LeafRole::Redis];
        let err = validate(config).unwrap_err();
        assert!(err.to_string().contains("copy-server"));

        let mut config = AppConfig::default();
        config.provisioning.roles = vec![LeafRole::Client, LeafRole::Redis];
        config.provisioning.redis_policy = RedisPolicy::Independent;
        assert!(validate(config).is_ok());
    }

    #[test]
    fn test_roles_and_sans_are_deduplicated() {
        let mut config = AppConfig::default();
        config.provisioning.roles = vec![LeafRole::Server, LeafRole::Server];
        config.provisioning.server_san = vec![
            "localhost".to_string(),
            "LOCALHOST".to_string(),
            "127.0.0.1".to_string(),
        ];
        let config = validate(config).unwrap();
        assert_eq!(config.roles.len(), 1);
        assert_eq!(config.server_san.len(), 2);
    }

    #[test]
    fn test_rejects_invalid_san_and_empty_roles() {
        let mut config = AppConfig::default();
        config.provisioning.server_san = vec!["not a host".to_string()];
        assert!(validate(config).is_err());

        let mut config = AppConfig::default();
        config.provisioning.roles.clear();
        assert!(validate(config).is_err());
    }
}
