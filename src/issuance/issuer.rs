use thiserror::Error;

/// Certificate authority operations the issuance workflow drives.
///
/// Implementations keep whatever protocol state they need behind `&self`; the workflow
/// only passes the opaque handles back in. Status queries make one round trip each, so
/// the caller owns every wait.
pub trait CertificateAuthority {
    /// Registers a new account and returns its serialized key material for persistence.
    fn register_account(&self, contact_email: &str) -> Result<String, IssuerError>;
    /// Reuses an account from key material previously returned by `register_account`.
    fn restore_account(&self, account_key: &str) -> Result<(), IssuerError>;
    fn create_order(&self, identifiers: &[String]) -> Result<OrderHandle, IssuerError>;
    fn authorizations(&self, order: &OrderHandle) -> Result<Vec<Authorization>, IssuerError>;
    fn request_validation(
        &self,
        order: &OrderHandle,
        challenge: &DnsChallenge,
    ) -> Result<(), IssuerError>;
    fn challenge_status(
        &self,
        order: &OrderHandle,
        challenge: &DnsChallenge,
    ) -> Result<ChallengeStatus, IssuerError>;
    fn finalize(&self, order: &OrderHandle, request: &CertificateRequest)
    -> Result<(), IssuerError>;
    fn order_status(&self, order: &OrderHandle) -> Result<OrderStatus, IssuerError>;
    fn certificate(&self, order: &OrderHandle) -> Result<String, IssuerError>;
    fn revoke(&self, certificate_der: &[u8]) -> Result<(), IssuerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHandle {
    pub id: String,
    pub identifiers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct Authorization {
    pub identifier: String,
    pub status: AuthorizationStatus,
    pub challenge: DnsChallenge,
}

/// The DNS-01 proof object of one authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsChallenge {
    /// Authority-side reference used to address the challenge again.
    pub id: String,
    /// Identifier the challenge proves control of.
    pub identifier: String,
    /// Value that must be published as a TXT record.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid { detail: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid { detail: Option<String> },
}

/// What the CSR submitted at finalization must contain.
#[derive(Clone)]
pub struct CertificateRequest {
    pub common_name: String,
    pub names: Vec<String>,
    pub private_key_pem: String,
}

impl std::fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("common_name", &self.common_name)
            .field("names", &self.names)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("issuer unavailable: {0}")]
    Unavailable(String),
    #[error("issuer configuration invalid: {0}")]
    InvalidConfig(String),
    #[error("issuer operation failed: {0}")]
    Operation(String),
}
