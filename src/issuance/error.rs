use thiserror::Error;

use super::issuer::IssuerError;
use super::retry::WaitError;
use crate::storage::StoreError;

/// Fatal outcomes of an issuance or revocation run. Each polling stage has its own
/// variant so operators can tell which stage stalled.
#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error("configuration invalid: {0}")]
    Config(String),
    #[error("no hosted zone found for {domain}")]
    ZoneLookup { domain: String },
    #[error("zone provider request failed: {0}")]
    ZoneProvider(String),
    #[error("zone change for {record_name} not in sync after {attempts} checks")]
    ZonePropagation { record_name: String, attempts: u32 },
    #[error("TXT values for {record_name} not visible in public DNS after {attempts} checks")]
    PropagationTimeout { record_name: String, attempts: u32 },
    #[error("challenge for {identifier} still pending after {attempts} checks")]
    ChallengeTimeout { identifier: String, attempts: u32 },
    #[error("challenge for {identifier} failed validation: {detail}")]
    ChallengeValidation { identifier: String, detail: String },
    #[error("order not completed after {attempts} checks")]
    OrderTimeout { attempts: u32 },
    #[error("order became invalid: {detail}")]
    OrderInvalid { detail: String },
    #[error("certificate authority error: {0}")]
    Authority(#[from] IssuerError),
    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),
    #[error("key handling failed: {0}")]
    Crypto(String),
    #[error("stored certificate unreadable: {0}")]
    Certificate(String),
    #[error("{stage} cancelled before completion")]
    Cancelled { stage: String },
}

impl WaitError<IssuanceError> {
    /// Maps a stopped poll loop onto the stage-specific error.
    pub(crate) fn into_issuance(
        self,
        stage: &str,
        exhausted: impl FnOnce(u32) -> IssuanceError,
    ) -> IssuanceError {
        match self {
            WaitError::Exhausted { attempts } => exhausted(attempts),
            WaitError::Cancelled => IssuanceError::Cancelled {
                stage: stage.to_string(),
            },
            WaitError::Failed(err) => err,
        }
    }
}
