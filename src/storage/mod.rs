pub mod artifacts;
pub mod s3;

use thiserror::Error;

pub use artifacts::{Artifact, ArtifactNames, ArtifactStore};
pub use s3::S3ObjectStore;

/// Errors produced by object store backends. A missing object is not an error; backends
/// report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("object store error: {0}")]
    Backend(String),
    #[error("object {key} is not valid UTF-8 text")]
    Encoding { key: String },
}

/// Metadata attached to every stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Hex-encoded SHA-256 of the body.
    pub sha256: String,
    pub content_type: String,
    pub content_disposition: String,
}

/// Durable named-blob storage.
pub trait ObjectStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, body: &[u8], metadata: &ObjectMetadata) -> Result<(), StoreError>;
}
