//! Diffie-Hellman parameters for forward-secret cipher negotiation.
//!
//! Independent of the certificate chain: the set is either generated fresh
//! (generator 2, like `openssl dhparam`) or imported from an existing PKCS#3
//! PEM file, which avoids the long generation time on repeated runs.

use crate::artifacts::Artifact;
use crate::configs::{DhSource, MIN_DH_BITS};
use crate::error::{ProvisionError, Step};
use openssl::dh::Dh;
use openssl::pkey::Params;
use std::fs;
use std::path::Path;

const DH_GENERATOR: u32 = 2;
const STEP: Step = Step::DhParameters;

pub fn obtain(source: &DhSource) -> Result<Dh<Params>, ProvisionError> {
    match source {
        DhSource::Generate { bits } => generate(*bits),
        DhSource::Import(path) => import(path),
    }
}

pub fn generate(bits: u32) -> Result<Dh<Params>, ProvisionError> {
    if bits < MIN_DH_BITS {
        return Err(ProvisionError::Config(format!(
            "DH parameters must be at least {} bits, got {}",
            MIN_DH_BITS, bits
        )));
    }
    tracing::info!(bits, "generating DH parameters, this can take a while");
    Dh::generate_params(bits, DH_GENERATOR)
        .map_err(ProvisionError::crypto(STEP, Artifact::DhParams))
}

pub fn import(path: &Path) -> Result<Dh<Params>, ProvisionError> {
    let pem = fs::read(path).map_err(ProvisionError::io(STEP, path))?;
    let dh = parse_pem(&pem).map_err(|reason| ProvisionError::Input {
        step: STEP,
        path: path.to_path_buf(),
        reason,
    })?;
    tracing::info!(file = %path.display(), bits = prime_bits(&dh), "imported DH parameters");
    Ok(dh)
}

/// Parse PKCS#3 PEM and enforce the minimum prime size.
pub fn parse_pem(pem: &[u8]) -> Result<Dh<Params>, String> {
    let dh = Dh::params_from_pem(pem).map_err(|e| format!("not valid DH parameters: {}", e))?;
    let bits = prime_bits(&dh);
    if bits < MIN_DH_BITS as i32 {
        return Err(format!(
            "prime is {} bits, at least {} required",
            bits, MIN_DH_BITS
        ));
    }
    Ok(dh)
}

pub fn prime_bits(dh: &Dh<Params>) -> i32 {
    dh.prime_p().num_bits()
}

pub fn to_pem(dh: &Dh<Params>) -> Result<Vec<u8>, ProvisionError> {
    dh.params_to_pem()
        .map_err(ProvisionError::crypto(STEP, Artifact::DhParams))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_well_known_group() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dh.pem");
        fs::write(&path, Dh::get_2048_256().unwrap().params_to_pem().unwrap()).unwrap();

        let dh = obtain(&DhSource::Import(path)).unwrap();
        assert_eq!(prime_bits(&dh), 2048);
        assert!(to_pem(&dh).unwrap().starts_with(b"-----BEGIN DH PARAMETERS-----"));
    }

    #[test]
    fn test_import_rejects_small_prime() {
        let pem = Dh::get_1024_160().unwrap().params_to_pem().unwrap();
        match parse_pem(&pem) {
            Ok(_) => panic!("1024-bit group accepted"),
            Err(reason) => assert!(reason.contains("1024 bits")),
        }
    }

    #[test]
    fn test_import_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dh.pem");
        fs::write(&path, b"not pem").unwrap();
        match import(&path) {
            Ok(_) => panic!("garbage accepted as DH parameters"),
            Err(err) => {
                assert!(matches!(err, ProvisionError::Input { .. }));
                assert!(err.to_string().starts_with("step 4 (DH parameters)"));
            }
        }
    }

    #[test]
    fn test_import_missing_file_is_io_error() {
        let err = import(Path::new("/nonexistent/dhparam.pem")).err().unwrap();
        assert_eq!(err.step(), Some(Step::DhParameters));
    }

    #[test]
    fn test_generate_rejects_small_size() {
        assert!(matches!(generate(1024), Err(ProvisionError::Config(_))));
    }

    #[test]
    #[ignore = "slow: generates 2048-bit DH parameters"]
    fn test_generate_minimum_size() {
        let dh = generate(MIN_DH_BITS).unwrap();
        assert_eq!(prime_bits(&dh), MIN_DH_BITS as i32);
    }
}
