use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_route53::config::Credentials;
use tokio::runtime::Runtime;

use crate::config::AwsSettings;

const CREDENTIALS_PROVIDER: &str = "acme-dns-renew";

/// The AWS SDK is async; the workflow is blocking, so every AWS call is driven through one
/// runtime shared by all collaborators.
pub fn build_runtime() -> Result<Arc<Runtime>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    Ok(Arc::new(runtime))
}

/// Loads SDK configuration for one collaborator. Explicit credentials win; otherwise the
/// default provider chain (environment, profile, instance role) is used. Every request
/// attempt is bounded by `attempt_timeout`.
pub fn load_sdk_config(
    runtime: &Runtime,
    settings: &AwsSettings,
    attempt_timeout: Duration,
) -> SdkConfig {
    runtime.block_on(async {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(
            TimeoutConfig::builder()
                .operation_attempt_timeout(attempt_timeout)
                .build(),
        );
        if let (Some(access_key), Some(secret_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                settings.session_token.clone(),
                None,
                CREDENTIALS_PROVIDER,
            ));
        }
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        loader.load().await
    })
}
