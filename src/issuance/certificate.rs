use chrono::{DateTime, Duration, Utc};
use x509_parser::parse_x509_certificate;

use super::error::IssuanceError;

/// DER body of the leaf (first) certificate in a PEM chain.
pub fn leaf_der(chain_pem: &str) -> Result<Vec<u8>, IssuanceError> {
    let blocks = pem::parse_many(chain_pem.as_bytes())
        .map_err(|e| IssuanceError::Certificate(format!("invalid PEM: {e}")))?;
    blocks
        .into_iter()
        .find(|block| block.tag() == "CERTIFICATE")
        .map(|block| block.into_contents())
        .ok_or_else(|| IssuanceError::Certificate("no CERTIFICATE block found".into()))
}

/// Expiry of the leaf certificate in a PEM chain.
pub fn not_after(chain_pem: &str) -> Result<DateTime<Utc>, IssuanceError> {
    let der = leaf_der(chain_pem)?;
    let (_, cert) = parse_x509_certificate(&der)
        .map_err(|e| IssuanceError::Certificate(format!("failed to parse certificate: {e}")))?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        IssuanceError::Certificate(format!("expiry timestamp {timestamp} out of range"))
    })
}

/// Renewal is due once the certificate is inside the last `renew_days` of its validity.
/// A certificate expiring exactly at the threshold is renewed.
pub fn renewal_due(not_after: DateTime<Utc>, now: DateTime<Utc>, renew_days: u32) -> bool {
    not_after <= now + Duration::days(i64::from(renew_days))
}
