pub mod acme;
pub mod certificate;
pub mod challenge;
pub mod dns;
pub mod dns_providers;
pub mod error;
pub mod flow;
pub mod issuer;
pub mod keys;
pub mod retry;
pub mod zone;

pub use error::IssuanceError;
pub use flow::{CertificateLifecycle, Collaborators, RenewOutcome, RevokeOutcome};
