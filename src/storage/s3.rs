use aws_config::SdkConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use log::debug;

use super::{ObjectMetadata, ObjectStore, StoreError};
use crate::issuance::retry::Cancellation;

/// [`ObjectStore`] backed by one S3 bucket.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    cancel: Cancellation,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &SdkConfig, bucket: impl Into<String>, cancel: Cancellation) -> Self {
        Self {
            client: Client::new(sdk_config),
            bucket: bucket.into(),
            cancel,
        }
    }

    fn cancelled(&self, action: &str, key: &str) -> StoreError {
        StoreError::Unavailable(format!("{action} s3://{}/{key} cancelled", self.bucket))
    }
}

impl ObjectStore for S3ObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let read = self.cancel.block_on(async {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await;

            let output = match response {
                Ok(output) => output,
                Err(err) if is_not_found(&err) => {
                    debug!("[s3] s3://{}/{key} not found", self.bucket);
                    return Ok(None);
                }
                Err(err) => {
                    return Err(StoreError::Unavailable(format!(
                        "failed to read s3://{}/{key}: {}",
                        self.bucket,
                        describe(&err)
                    )));
                }
            };

            let body = output.body.collect().await.map_err(|e| {
                StoreError::Backend(format!(
                    "failed to read body of s3://{}/{key}: {e}",
                    self.bucket
                ))
            })?;
            Ok(Some(body.into_bytes().to_vec()))
        });
        read.unwrap_or_else(|| Err(self.cancelled("read of", key)))
    }

    fn put(&self, key: &str, body: &[u8], metadata: &ObjectMetadata) -> Result<(), StoreError> {
        let write = self.cancel.block_on(async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .acl(ObjectCannedAcl::Private)
                .body(ByteStream::from(body.to_vec()))
                .content_type(&metadata.content_type)
                .content_disposition(&metadata.content_disposition)
                .metadata("sha256", &metadata.sha256)
                .send()
                .await
                .map_err(|err| {
                    StoreError::Backend(format!(
                        "failed to write s3://{}/{key}: {}",
                        self.bucket,
                        err.into_service_error()
                    ))
                })?;
            debug!("[s3] wrote s3://{}/{key}", self.bucket);
            Ok(())
        });
        write.unwrap_or_else(|| Err(self.cancelled("write of", key)))
    }
}

fn is_not_found(err: &SdkError<GetObjectError>) -> bool {
    match err.as_service_error() {
        Some(service) => service.is_no_such_key() || service.code() == Some("NotFound"),
        None => false,
    }
}

fn describe(err: &SdkError<GetObjectError>) -> String {
    match err.as_service_error() {
        Some(service) => format!(
            "{}: {}",
            service.code().unwrap_or("unknown"),
            service.message().unwrap_or("no message")
        ),
        None => err.to_string(),
    }
}
