//! Provisioning error types.
//!
//! Every failure names the pipeline [`Step`] it happened in and the artifact
//! (or path) it concerns, so a failed run can be diagnosed from the message
//! alone.

use crate::artifacts::Artifact;
use crate::roles::LeafRole;
use openssl::error::ErrorStack;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Pipeline stage, numbered as in the provisioning order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CertificateAuthority,
    Leaf(LeafRole),
    RedisCopy,
    DhParameters,
    Permissions,
    Verification,
}

impl Step {
    pub fn number(self) -> u8 {
        match self {
            Step::CertificateAuthority => 1,
            Step::Leaf(_) => 2,
            Step::RedisCopy => 3,
            Step::DhParameters => 4,
            Step::Permissions => 5,
            Step::Verification => 6,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.number();
        match self {
            Step::CertificateAuthority => write!(f, "step {} (certificate authority)", n),
            Step::Leaf(role) => write!(f, "step {} ({} certificate)", n, role),
            Step::RedisCopy => write!(f, "step {} (redis copy of server pair)", n),
            Step::DhParameters => write!(f, "step {} (DH parameters)", n),
            Step::Permissions => write!(f, "step {} (file permissions)", n),
            Step::Verification => write!(f, "step {} (verification)", n),
        }
    }
}

/// Errors that abort a provisioning run.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Key or parameter generation failed inside OpenSSL.
    #[error("{step}: failed to generate {artifact}: {source}")]
    Crypto {
        step: Step,
        artifact: Artifact,
        #[source]
        source: ErrorStack,
    },

    /// A signing request was malformed, the CA pair did not match, or signing failed.
    #[error("{step}: failed to sign {artifact}: {reason}")]
    Signing {
        step: Step,
        artifact: Artifact,
        reason: String,
    },

    /// Directory or file I/O failed.
    #[error("{step}: I/O error on {}: {source}", .path.display())]
    Io {
        step: Step,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An input file read during a step is unusable.
    #[error("{step}: invalid input {}: {reason}", .path.display())]
    Input {
        step: Step,
        path: PathBuf,
        reason: String,
    },

    /// Configuration rejected before the pipeline starts.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ProvisionError {
    pub(crate) fn crypto(step: Step, artifact: Artifact) -> impl FnOnce(ErrorStack) -> Self {
        move |source| ProvisionError::Crypto {
            step,
            artifact,
            source,
        }
    }

    pub(crate) fn signing(step: Step, artifact: Artifact, reason: impl Into<String>) -> Self {
        ProvisionError::Signing {
            step,
            artifact,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(step: Step, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| ProvisionError::Io { step, path, source }
    }

    /// The step the failure happened in, if it happened inside the pipeline.
    pub fn step(&self) -> Option<Step> {
        match self {
            ProvisionError::Crypto { step, .. }
            | ProvisionError::Signing { step, .. }
            | ProvisionError::Io { step, .. }
            | ProvisionError::Input { step, .. } => Some(*step),
            ProvisionError::Config(_) => None,
        }
    }
}
