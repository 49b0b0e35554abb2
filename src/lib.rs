pub mod aws;
pub mod config;
pub mod domain;
pub mod issuance;
pub mod storage;

pub use config::{Config, load_config};
pub use issuance::{CertificateLifecycle, Collaborators, IssuanceError, RenewOutcome, RevokeOutcome};
