use openssl::pkey::PKey;
use openssl::rsa::Rsa;

use super::error::IssuanceError;

pub const SUPPORTED_RSA_SIZES: [u32; 3] = [2048, 3072, 4096];

/// Generates a fresh RSA private key for the certificate and returns it as PKCS#8 PEM.
pub fn generate_certificate_key_pem(key_size: u32) -> Result<String, IssuanceError> {
    if !SUPPORTED_RSA_SIZES.contains(&key_size) {
        return Err(IssuanceError::Crypto(format!(
            "unsupported RSA key size {key_size}. Allowed: 2048, 3072, 4096"
        )));
    }
    let rsa = Rsa::generate(key_size)
        .map_err(|e| IssuanceError::Crypto(format!("RSA key generation failed: {e}")))?;
    let key = PKey::from_rsa(rsa)
        .map_err(|e| IssuanceError::Crypto(format!("failed to wrap RSA key: {e}")))?;
    let key_pem = key
        .private_key_to_pem_pkcs8()
        .map_err(|e| IssuanceError::Crypto(format!("failed to serialize private key: {e}")))?;
    String::from_utf8(key_pem)
        .map_err(|_| IssuanceError::Crypto("private key PEM contained invalid UTF-8".into()))
}

/// Checks that a stored PEM still parses as a private key before it is reused.
pub fn check_private_key_pem(pem: &str) -> Result<(), IssuanceError> {
    PKey::private_key_from_pem(pem.as_bytes())
        .map(|_| ())
        .map_err(|e| IssuanceError::Crypto(format!("stored private key is not usable: {e}")))
}
