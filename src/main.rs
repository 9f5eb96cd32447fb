//! PKI Provision - certificate chain provisioning CLI
//!
//! Generates the CA, server, client and Redis certificates plus DH
//! parameters into one directory, and verifies such a directory afterwards.
//!
//! # Quick Start
//!
//! ```bash
//! pki-provision provision --out certs --organization Example \
//!     --san localhost --san 127.0.0.1
//! pki-provision verify --dir certs
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use openssl::hash::MessageDigest;
use pki_provision::artifacts::Artifact;
use pki_provision::configs::{AppConfig, ProvisionConfig};
use pki_provision::verify::{verify_bundle, verify_directory, VerifyReport};
use pki_provision::{provision, LeafRole, RedisPolicy};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const CA_PASSPHRASE_ENV: &str = "PKI_PROVISION_CA_PASSPHRASE";

/// Provision and verify a development/production certificate chain
#[derive(Parser)]
#[command(name = "pki-provision", version, about)]
struct Cli {
    /// TOML configuration file; command-line flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate CA, leaf certificates and DH parameters
    Provision(ProvisionArgs),

    /// Check an output directory against the chain and permission invariants
    Verify {
        /// Directory written by `provision`
        #[arg(long)]
        dir: PathBuf,

        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ProvisionArgs {
    /// Output directory
    #[arg(long)]
    out: Option<PathBuf>,

    /// Country (C), 2-letter ISO code
    #[arg(long)]
    country: Option<String>,

    /// State or province (ST)
    #[arg(long)]
    state: Option<String>,

    /// Locality (L)
    #[arg(long)]
    locality: Option<String>,

    /// Organization (O)
    #[arg(long)]
    organization: Option<String>,

    /// Organizational unit (OU)
    #[arg(long)]
    organizational_unit: Option<String>,

    /// Common name (CN) of the CA and server certificate
    #[arg(long)]
    common_name: Option<String>,

    /// Email address
    #[arg(long)]
    email: Option<String>,

    /// Validity of every certificate, in days
    #[arg(long)]
    days: Option<u32>,

    /// RSA key size of the CA
    #[arg(long)]
    ca_key_bits: Option<u32>,

    /// RSA key size of each leaf
    #[arg(long)]
    leaf_key_bits: Option<u32>,

    /// DH prime size when generating parameters
    #[arg(long, conflicts_with = "dh_params")]
    dh_bits: Option<u32>,

    /// Import DH parameters from this PEM file instead of generating them
    #[arg(long)]
    dh_params: Option<PathBuf>,

    /// Server Subject Alternative Name, DNS name or IP address (repeatable)
    #[arg(long = "san", value_name = "DNS-OR-IP")]
    san: Vec<String>,

    /// Leaf roles to issue
    #[arg(long, value_enum, value_delimiter = ',')]
    roles: Vec<LeafRole>,

    /// How the Redis pair is produced
    #[arg(long, value_enum)]
    redis_policy: Option<RedisPolicy>,

    /// Common name of the client certificate
    #[arg(long)]
    client_common_name: Option<String>,

    /// Common name of the Redis certificate (independent policy)
    #[arg(long)]
    redis_common_name: Option<String>,

    /// Encrypt ca.key with a passphrase (from PKI_PROVISION_CA_PASSPHRASE or a prompt)
    #[arg(long)]
    encrypt_ca_key: bool,
}

impl ProvisionArgs {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut AppConfig) {
        let identity = &mut config.identity;
        let overrides = [
            (&mut identity.country, &self.country),
            (&mut identity.state, &self.state),
            (&mut identity.locality, &self.locality),
            (&mut identity.organization, &self.organization),
            (&mut identity.organizational_unit, &self.organizational_unit),
            (&mut identity.common_name, &self.common_name),
            (&mut identity.email, &self.email),
        ];
        for (field, value) in overrides {
            if let Some(value) = value {
                *field = value.clone();
            }
        }

        let settings = &mut config.provisioning;
        if let Some(out) = &self.out {
            settings.output_dir = out.clone();
        }
        if let Some(days) = self.days {
            settings.validity_days = days;
        }
        if let Some(bits) = self.ca_key_bits {
            settings.ca_key_bits = bits;
        }
        if let Some(bits) = self.leaf_key_bits {
            settings.leaf_key_bits = bits;
        }
        if let Some(bits) = self.dh_bits {
            settings.dh_bits = bits;
            settings.dh_params_path = None;
        }
        if let Some(path) = &self.dh_params {
            settings.dh_params_path = Some(path.clone());
        }
        if !self.san.is_empty() {
            settings.server_san = self.san.clone();
        }
        if !self.roles.is_empty() {
            settings.roles = self.roles.clone();
        }
        if let Some(policy) = self.redis_policy {
            settings.redis_policy = policy;
        }
        if let Some(cn) = &self.client_common_name {
            settings.client_common_name = cn.clone();
        }
        if let Some(cn) = &self.redis_common_name {
            settings.redis_common_name = cn.clone();
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Provision(args) => run_provision(cli.config.as_deref(), &args),
        Commands::Verify { dir, json } => run_verify(&dir, json),
    };

    if let Err(e) = result {
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_provision(config_path: Option<&Path>, args: &ProvisionArgs) -> Result<()> {
    println!("=== PKI Provision ===\n");

    let mut app_config = AppConfig::load(config_path)?;
    args.apply(&mut app_config);
    let output_dir = app_config.provisioning.output_dir.clone();

    let mut config =
        ProvisionConfig::try_from(app_config).context("Configuration rejected")?;
    if args.encrypt_ca_key {
        config = config.with_ca_key_passphrase(read_ca_passphrase()?);
    }

    let bundle = provision(&config, &output_dir).context("Provisioning failed")?;

    println!("✓ CA generated: {}", fingerprint(&bundle.ca.certificate)?);
    for (role, leaf) in &bundle.leaves {
        println!("✓ {} certificate issued: {}", role, fingerprint(&leaf.certificate)?);
    }
    println!("✓ DH parameters written");
    println!("✓ Permissions applied to {} files", bundle.files.len());

    let report = verify_bundle(&bundle);
    if !report.is_success() {
        print_report(&report);
        bail!("Provisioned chain failed verification");
    }
    println!("✓ Chain verified");

    println!("\nArtifacts in {}:", output_dir.display());
    for file in &bundle.files {
        println!("  {}", file.artifact);
    }
    if config.requests(LeafRole::Redis) && config.redis_policy == RedisPolicy::CopyServer {
        println!(
            "\n⚠ {} and {} are copies of the server pair",
            Artifact::LeafKey(LeafRole::Redis),
            Artifact::LeafCert(LeafRole::Redis)
        );
    }
    Ok(())
}

fn run_verify(dir: &Path, json: bool) -> Result<()> {
    let report = verify_directory(dir)
        .with_context(|| format!("Failed to verify {}", dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("=== Verify {} ===\n", dir.display());
        print_report(&report);
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(anyhow!(
            "{} of {} checks failed",
            report.failures().count(),
            report.checks.len()
        ))
    }
}

fn print_report(report: &VerifyReport) {
    for check in &report.checks {
        let mark = if check.passed { "✓" } else { "✗" };
        match &check.detail {
            Some(detail) => println!("{} {}: {} ({})", mark, check.artifact, check.check, detail),
            None => println!("{} {}: {}", mark, check.artifact, check.check),
        }
    }
}

fn read_ca_passphrase() -> Result<SecretString> {
    if let Ok(passphrase) = std::env::var(CA_PASSPHRASE_ENV) {
        if !passphrase.is_empty() {
            return Ok(SecretString::from(passphrase));
        }
    }

    let first = rpassword::prompt_password("CA private key passphrase: ")
        .context("Failed to read passphrase")?;
    if first.is_empty() {
        bail!("CA private key passphrase must not be empty");
    }
    let second = rpassword::prompt_password("Confirm passphrase: ")
        .context("Failed to read passphrase")?;
    if first != second {
        bail!("Passphrases do not match");
    }
    Ok(SecretString::from(first))
}

fn fingerprint(cert: &openssl::x509::X509Ref) -> Result<String> {
    let digest = cert
        .digest(MessageDigest::sha256())
        .context("Failed to compute certificate fingerprint")?;
    Ok(digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pki_provision::configs::DhSource;

    const FILE_CONFIG: &str = r#"
[identity]
organization = "From File"
country = "DE"

[provisioning]
output_dir = "file-certs"
validity_days = 90
dh_params_path = "/etc/ssl/dhparam.pem"
server_san = ["file.example", "10.0.0.1"]
"#;

    fn merged(args: &[&str]) -> AppConfig {
        let cli = Cli::try_parse_from(args).unwrap();
        let Commands::Provision(provision_args) = cli.command else {
            panic!("expected the provision subcommand");
        };
        let mut config = AppConfig::from_toml_str(FILE_CONFIG).unwrap();
        provision_args.apply(&mut config);
        config
    }

    #[test]
    fn test_flags_override_file_values() {
        let config = merged(&[
            "pki-provision",
            "provision",
            "--organization",
            "Example",
            "--days",
            "30",
            "--out",
            "cli-certs",
        ]);

        assert_eq!(config.identity.organization, "Example");
        assert_eq!(config.identity.country, "DE");
        assert_eq!(config.provisioning.validity_days, 30);
        assert_eq!(config.provisioning.output_dir, PathBuf::from("cli-certs"));
    }

    #[test]
    fn test_no_flags_keep_file_values() {
        let config = merged(&["pki-provision", "provision"]);

        assert_eq!(config.identity.organization, "From File");
        assert_eq!(config.provisioning.validity_days, 90);
        assert_eq!(
            config.provisioning.server_san,
            vec!["file.example".to_string(), "10.0.0.1".to_string()]
        );
        assert_eq!(
            config.provisioning.dh_params_path,
            Some(PathBuf::from("/etc/ssl/dhparam.pem"))
        );
    }

    #[test]
    fn test_dh_bits_replaces_file_import() {
        let config = merged(&["pki-provision", "provision", "--dh-bits", "3072"]);

        assert_eq!(config.provisioning.dh_params_path, None);
        let validated = ProvisionConfig::try_from(config).unwrap();
        assert_eq!(validated.dh, DhSource::Generate { bits: 3072 });
    }

    #[test]
    fn test_san_flags_replace_defaults() {
        let config = merged(&[
            "pki-provision",
            "provision",
            "--san",
            "api.internal",
            "--san",
            "192.168.1.10",
        ]);

        assert_eq!(
            config.provisioning.server_san,
            vec!["api.internal".to_string(), "192.168.1.10".to_string()]
        );
    }

    #[test]
    fn test_roles_are_comma_separated() {
        let config = merged(&[
            "pki-provision",
            "provision",
            "--roles",
            "server,redis",
            "--redis-policy",
            "independent",
        ]);

        assert_eq!(
            config.provisioning.roles,
            vec![LeafRole::Server, LeafRole::Redis]
        );
        assert_eq!(config.provisioning.redis_policy, RedisPolicy::Independent);
    }

    #[test]
    fn test_dh_bits_conflicts_with_dh_params() {
        let result = Cli::try_parse_from([
            "pki-provision",
            "provision",
            "--dh-bits",
            "2048",
            "--dh-params",
            "dh.pem",
        ]);
        assert_eq!(
            result.err().map(|e| e.kind()),
            Some(clap::error::ErrorKind::ArgumentConflict)
        );
    }

    #[test]
    fn test_verify_subcommand_and_global_flags() {
        let cli = Cli::try_parse_from(["pki-provision", "verify", "--dir", "certs", "--json", "-v"])
            .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Verify { dir, json } => {
                assert_eq!(dir, PathBuf::from("certs"));
                assert!(json);
            }
            Commands::Provision(_) => panic!("expected the verify subcommand"),
        }
    }
}
