use log::{debug, info};
use sha2::{Digest, Sha256};

use super::{ObjectMetadata, ObjectStore, StoreError};

const PEM_CONTENT_TYPE: &str = "application/x-pem-file";
const JSON_CONTENT_TYPE: &str = "application/json";

/// The three persisted objects. The account key is the CA client's account document
/// (private key plus account URL) as JSON; the other two are PEM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    AccountKey,
    CertificateKey,
    Certificate,
}

impl Artifact {
    fn label(self) -> &'static str {
        match self {
            Artifact::AccountKey => "account key",
            Artifact::CertificateKey => "certificate private key",
            Artifact::Certificate => "certificate",
        }
    }

    fn filename(self, common_name: Option<&str>) -> String {
        let stem = common_name.unwrap_or("cert").trim_start_matches("*.");
        match self {
            Artifact::AccountKey => "account.json".to_string(),
            Artifact::CertificateKey => format!("{stem}.key"),
            Artifact::Certificate => format!("{stem}.crt"),
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Artifact::AccountKey => JSON_CONTENT_TYPE,
            Artifact::CertificateKey | Artifact::Certificate => PEM_CONTENT_TYPE,
        }
    }
}

/// Stable object names for each artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    pub account_key: String,
    pub certificate_private_key: String,
    pub certificate_pem: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            account_key: "acme/account.json".to_string(),
            certificate_private_key: "acme/certificate.key".to_string(),
            certificate_pem: "acme/certificate.pem".to_string(),
        }
    }
}

impl ArtifactNames {
    pub fn key_for(&self, artifact: Artifact) -> &str {
        match artifact {
            Artifact::AccountKey => &self.account_key,
            Artifact::CertificateKey => &self.certificate_private_key,
            Artifact::Certificate => &self.certificate_pem,
        }
    }
}

/// Reads and writes the account key, certificate key and certificate chain.
pub struct ArtifactStore<'a> {
    backend: &'a dyn ObjectStore,
    names: ArtifactNames,
}

impl<'a> ArtifactStore<'a> {
    pub fn new(backend: &'a dyn ObjectStore, names: ArtifactNames) -> Self {
        Self { backend, names }
    }

    /// Returns the stored text, or `None` when the object does not exist.
    pub fn get(&self, artifact: Artifact) -> Result<Option<String>, StoreError> {
        let key = self.names.key_for(artifact);
        match self.backend.get(key)? {
            Some(body) => {
                debug!("[store] loaded {} from {key}", artifact.label());
                String::from_utf8(body)
                    .map(Some)
                    .map_err(|_| StoreError::Encoding {
                        key: key.to_string(),
                    })
            }
            None => {
                info!("[store] no {} stored at {key}", artifact.label());
                Ok(None)
            }
        }
    }

    /// Overwrites the artifact, attaching its SHA-256 digest as metadata.
    pub fn put(
        &self,
        artifact: Artifact,
        body: &str,
        common_name: Option<&str>,
    ) -> Result<(), StoreError> {
        let key = self.names.key_for(artifact);
        let metadata = ObjectMetadata {
            sha256: sha256_hex(body.as_bytes()),
            content_type: artifact.content_type().to_string(),
            content_disposition: format!(
                "attachment; filename=\"{}\"",
                artifact.filename(common_name)
            ),
        };
        self.backend.put(key, body.as_bytes(), &metadata)?;
        info!(
            "[store] saved {} to {key} (sha256 {})",
            artifact.label(),
            metadata.sha256
        );
        Ok(())
    }
}

pub fn sha256_hex(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}
