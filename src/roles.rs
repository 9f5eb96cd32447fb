//! Leaf roles, the Redis policy and Subject Alternative Name entries.

use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A leaf certificate the provisioner can issue under the CA.
///
/// Ordering follows issuance order: server first, then client, then redis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LeafRole {
    Server,
    Client,
    Redis,
}

impl LeafRole {
    pub const ALL: [LeafRole; 3] = [LeafRole::Server, LeafRole::Client, LeafRole::Redis];

    /// File stem used for `<stem>.key` / `<stem>.crt`.
    pub fn file_stem(self) -> &'static str {
        match self {
            LeafRole::Server => "server",
            LeafRole::Client => "client",
            LeafRole::Redis => "redis",
        }
    }
}

impl fmt::Display for LeafRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// How the Redis key/certificate pair is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RedisPolicy {
    /// Write the server pair again under the Redis file names.
    #[default]
    CopyServer,
    /// Issue Redis as its own leaf with its own key.
    Independent,
}

impl fmt::Display for RedisPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedisPolicy::CopyServer => f.write_str("copy-server"),
            RedisPolicy::Independent => f.write_str("independent"),
        }
    }
}

/// One Subject Alternative Name entry of the server certificate.
///
/// DNS names are case-insensitive and stored lowercased, so `Foo.Example`
/// is issued as `DNS:foo.example` and deduplicates against `foo.example`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SanEntry {
    Dns(String),
    Ip(IpAddr),
}

impl FromStr for SanEntry {
    type Err = String;

    /// Anything that parses as an IP address is an IP entry, everything else a DNS name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty SAN entry".to_string());
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(SanEntry::Ip(ip));
        }
        let valid = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '*' | '_'));
        if !valid || s.starts_with('.') || s.contains("..") {
            return Err(format!("invalid DNS name in SAN: {:?}", s));
        }
        Ok(SanEntry::Dns(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for SanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SanEntry::Dns(name) => write!(f, "DNS:{}", name),
            SanEntry::Ip(ip) => write!(f, "IP:{}", ip),
        }
    }
}
