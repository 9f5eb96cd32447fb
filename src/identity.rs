//! Identity Profile and X.509 subject construction.

use crate::artifacts::Artifact;
use crate::error::{ProvisionError, Step};
use openssl::nid::Nid;
use openssl::x509::{X509Name, X509NameRef};
use serde::Deserialize;

/// Subject attributes copied into every certificate of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityProfile {
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_locality")]
    pub locality: String,
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default = "default_organizational_unit")]
    pub organizational_unit: String,
    #[serde(default = "default_common_name")]
    pub common_name: String,
    #[serde(default = "default_email")]
    pub email: String,
}

impl Default for IdentityProfile {
    fn default() -> Self {
        Self {
            country: default_country(),
            state: default_state(),
            locality: default_locality(),
            organization: default_organization(),
            organizational_unit: default_organizational_unit(),
            common_name: default_common_name(),
            email: default_email(),
        }
    }
}

fn default_country() -> String {
    "IT".to_string()
}

fn default_state() -> String {
    "Lombardia".to_string()
}

fn default_locality() -> String {
    "Milano".to_string()
}

fn default_organization() -> String {
    "Clearify".to_string()
}

fn default_organizational_unit() -> String {
    "Development".to_string()
}

fn default_common_name() -> String {
    "localhost".to_string()
}

fn default_email() -> String {
    "admin@localhost".to_string()
}

impl IdentityProfile {
    /// Organizational unit of the CA subject: the profile OU with a ` CA` suffix.
    pub fn ca_organizational_unit(&self) -> String {
        if self.organizational_unit.is_empty() {
            "CA".to_string()
        } else {
            format!("{} CA", self.organizational_unit)
        }
    }

    /// Build a subject name from the profile, overriding CN and OU.
    ///
    /// Attribute order is C, ST, L, O, OU, CN, emailAddress; empty
    /// attributes are left out.
    pub(crate) fn subject_name(
        &self,
        common_name: &str,
        organizational_unit: &str,
        step: Step,
        artifact: Artifact,
    ) -> Result<X509Name, ProvisionError> {
        let fail = |field: &str, e: openssl::error::ErrorStack| {
            ProvisionError::signing(step, artifact, format!("failed to set {}: {}", field, e))
        };

        let mut name_builder = X509Name::builder().map_err(ProvisionError::crypto(step, artifact))?;

        let entries = [
            (Nid::COUNTRYNAME, "country", self.country.as_str()),
            (Nid::STATEORPROVINCENAME, "state/province", self.state.as_str()),
            (Nid::LOCALITYNAME, "locality", self.locality.as_str()),
            (Nid::ORGANIZATIONNAME, "organization", self.organization.as_str()),
            (Nid::ORGANIZATIONALUNITNAME, "organizational unit", organizational_unit),
            (Nid::COMMONNAME, "CN", common_name),
            (Nid::PKCS9_EMAILADDRESS, "email", self.email.as_str()),
        ];
        for (nid, field, value) in entries {
            if value.is_empty() {
                continue;
            }
            name_builder
                .append_entry_by_nid(nid, value)
                .map_err(|e| fail(field, e))?;
        }

        Ok(name_builder.build())
    }
}

/// Read one attribute of a subject name as UTF-8, if present.
pub fn name_entry(name: &X509NameRef, nid: Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
}

/// Attribute-by-attribute equality of two names.
pub fn names_equal(a: &X509NameRef, b: &X509NameRef) -> bool {
    let entries = |name: &X509NameRef| -> Vec<(Nid, Vec<u8>)> {
        name.entries()
            .map(|e| (e.object().nid(), e.data().as_slice().to_vec()))
            .collect()
    };
    entries(a) == entries(b)
}

/// One-line `C=.., O=.., CN=..` rendering for logs and reports.
pub fn describe_name(name: &X509NameRef) -> String {
    name.entries()
        .map(|e| {
            let key = e.object().nid().short_name().unwrap_or("?");
            let value = e
                .data()
                .to_string()
                .unwrap_or_else(|_| String::from("<binary>"));
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
