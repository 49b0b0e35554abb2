use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::{normalize_identifier, normalize_identifiers};
use crate::issuance::acme::{LETS_ENCRYPT_PRODUCTION, LETS_ENCRYPT_STAGING};
use crate::issuance::error::IssuanceError;
use crate::issuance::keys::SUPPORTED_RSA_SIZES;
use crate::issuance::retry::RetryPolicy;
use crate::storage::ArtifactNames;

const DEFAULT_ROUTE53_REGION: &str = "us-east-1";

/// Credentials and region for one AWS collaborator. Unset fields fall through to the SDK's
/// default provider chain.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AwsSettings {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub region: Option<String>,
}

impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "[redacted]"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[redacted]"),
            )
            .field("region", &self.region)
            .finish()
    }
}

impl AwsSettings {
    /// Fills every unset field from `fallback`.
    fn or(self, fallback: &AwsSettings) -> AwsSettings {
        AwsSettings {
            access_key_id: self.access_key_id.or_else(|| fallback.access_key_id.clone()),
            secret_access_key: self
                .secret_access_key
                .or_else(|| fallback.secret_access_key.clone()),
            session_token: self.session_token.or_else(|| fallback.session_token.clone()),
            region: self.region.or_else(|| fallback.region.clone()),
        }
    }

    fn from_env(env: &impl Fn(&str) -> Option<String>) -> AwsSettings {
        let read = |name: &str| env(name).filter(|value| !value.trim().is_empty());
        AwsSettings {
            access_key_id: read("AWS_ACCESS_KEY_ID"),
            secret_access_key: read("AWS_SECRET_ACCESS_KEY"),
            session_token: read("AWS_SESSION_TOKEN"),
            region: read("AWS_REGION"),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawS3 {
    bucket: Option<String>,
    account_key: Option<String>,
    certificate_private_key: Option<String>,
    certificate_pem: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    session_token: Option<String>,
    region: Option<String>,
}

#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRoute53 {
    hosted_zone_id: Option<String>,
    domain: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    session_token: Option<String>,
    region: Option<String>,
}

/// On-disk shape of the configuration file.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    domains: Vec<String>,
    common_name: Option<String>,
    contact_email: Option<String>,
    #[serde(default = "default_key_size")]
    key_size: u32,
    #[serde(default = "default_renew_days")]
    renew_days: u32,
    #[serde(default)]
    same_private_key_on_renew: bool,
    #[serde(default)]
    production: bool,
    directory_url: Option<String>,
    log_level: Option<String>,
    deadline_secs: Option<u64>,
    #[serde(default = "default_request_timeout")]
    request_timeout_secs: f64,

    #[serde(default = "default_dns_retry_count")]
    dns_retry_count: u32,
    #[serde(default = "default_dns_retry_interval")]
    dns_retry_interval_secs: f64,
    #[serde(default = "default_resolve_timeout")]
    resolve_timeout_secs: f64,
    #[serde(default = "default_cert_retry_count")]
    cert_retry_count: u32,
    #[serde(default = "default_cert_retry_interval")]
    cert_retry_interval_secs: f64,
    #[serde(default = "default_challenge_retry_count")]
    challenge_retry_count: u32,
    #[serde(default = "default_challenge_retry_interval")]
    challenge_retry_interval_secs: f64,
    #[serde(default = "default_challenge_poll_count")]
    challenge_poll_count: u32,
    #[serde(default = "default_challenge_poll_interval")]
    challenge_poll_interval_millis: u64,

    #[serde(default)]
    aws: AwsSettings,
    s3: Option<RawS3>,
    #[serde(default)]
    route53: RawRoute53,
}

fn default_key_size() -> u32 {
    2048
}
fn default_renew_days() -> u32 {
    30
}
fn default_request_timeout() -> f64 {
    30.0
}
fn default_dns_retry_count() -> u32 {
    10
}
fn default_dns_retry_interval() -> f64 {
    5.0
}
fn default_resolve_timeout() -> f64 {
    5.0
}
fn default_cert_retry_count() -> u32 {
    10
}
fn default_cert_retry_interval() -> f64 {
    2.0
}
fn default_challenge_retry_count() -> u32 {
    3
}
fn default_challenge_retry_interval() -> f64 {
    2.0
}
fn default_challenge_poll_count() -> u32 {
    240
}
fn default_challenge_poll_interval() -> u64 {
    250
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub names: ArtifactNames,
    pub aws: AwsSettings,
}

#[derive(Debug, Clone)]
pub struct Route53Settings {
    pub hosted_zone_id: Option<String>,
    /// Zone lookup domain used for every record instead of the identifier's own.
    pub domain: Option<String>,
    pub aws: AwsSettings,
}

/// Per-stage retry budgets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub dns_sync: RetryPolicy,
    pub dns_propagation: RetryPolicy,
    pub resolve_timeout: Duration,
    pub order: RetryPolicy,
    pub challenge_pending: RetryPolicy,
    pub challenge_invalid: RetryPolicy,
}

/// Fully resolved run configuration. Nothing reads the environment after this is built.
#[derive(Debug, Clone)]
pub struct Config {
    /// Certificate identifiers, common name first.
    pub identifiers: Vec<String>,
    pub common_name: String,
    pub contact_email: String,
    pub key_size: u32,
    pub renew_days: u32,
    pub same_private_key_on_renew: bool,
    pub directory_url: String,
    pub log_level: Option<String>,
    pub deadline: Option<Duration>,
    /// Upper bound on a single CA or AWS request.
    pub request_timeout: Duration,
    pub retry: RetrySettings,
    pub s3: S3Settings,
    pub route53: Route53Settings,
}

/// Reads and resolves the configuration file at `path` against the process environment.
pub fn load_config(path: &Path) -> Result<Config, IssuanceError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        IssuanceError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    Config::from_toml_str(&contents, |name| std::env::var(name).ok())
}

impl Config {
    /// Parses TOML and resolves it; `env` supplies environment fallbacks.
    pub fn from_toml_str(
        contents: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Config, IssuanceError> {
        let raw: RawConfig = toml::from_str(contents)
            .map_err(|e| IssuanceError::Config(format!("invalid configuration file: {e}")))?;
        Self::resolve(raw, env)
    }

    fn resolve(
        raw: RawConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Config, IssuanceError> {
        let invalid = |msg: String| IssuanceError::Config(msg);

        let mut identifiers =
            normalize_identifiers(&raw.domains).map_err(|e| invalid(e.to_string()))?;
        let common_name = match raw.common_name.as_deref() {
            Some(cn) => normalize_identifier(cn).map_err(|e| invalid(e.to_string()))?,
            None => identifiers[0].clone(),
        };
        // The authority takes the first identifier as the certificate subject.
        identifiers.retain(|identifier| identifier != &common_name);
        identifiers.insert(0, common_name.clone());

        let contact_email = raw
            .contact_email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
            .ok_or_else(|| invalid("contact_email is required".into()))?;
        if !contact_email.contains('@') {
            return Err(invalid(format!("contact_email {contact_email} is not an address")));
        }

        if !SUPPORTED_RSA_SIZES.contains(&raw.key_size) {
            return Err(invalid(format!(
                "key_size {} is not supported. Allowed: 2048, 3072, 4096",
                raw.key_size
            )));
        }

        let directory_url = match raw.directory_url {
            Some(url) => url,
            None if raw.production => LETS_ENCRYPT_PRODUCTION.to_string(),
            None => LETS_ENCRYPT_STAGING.to_string(),
        };

        let retry = RetrySettings {
            dns_sync: policy("dns_retry", raw.dns_retry_count, raw.dns_retry_interval_secs)?,
            dns_propagation: policy("dns_retry", raw.dns_retry_count, raw.dns_retry_interval_secs)?,
            resolve_timeout: seconds("resolve_timeout_secs", raw.resolve_timeout_secs)?,
            order: policy("cert_retry", raw.cert_retry_count, raw.cert_retry_interval_secs)?,
            challenge_pending: RetryPolicy::new(
                positive("challenge_poll_count", raw.challenge_poll_count)?,
                Duration::from_millis(raw.challenge_poll_interval_millis),
            ),
            challenge_invalid: policy(
                "challenge_retry",
                raw.challenge_retry_count,
                raw.challenge_retry_interval_secs,
            )?,
        };

        let env_aws = AwsSettings::from_env(&env);
        let shared_aws = raw.aws.or(&env_aws);

        let raw_s3 = raw
            .s3
            .ok_or_else(|| invalid("[s3] section with a bucket is required".into()))?;
        let bucket = raw_s3
            .bucket
            .filter(|bucket| !bucket.trim().is_empty())
            .ok_or_else(|| invalid("s3.bucket is required".into()))?;
        let defaults = ArtifactNames::default();
        let s3 = S3Settings {
            bucket,
            names: ArtifactNames {
                account_key: raw_s3.account_key.unwrap_or(defaults.account_key),
                certificate_private_key: raw_s3
                    .certificate_private_key
                    .unwrap_or(defaults.certificate_private_key),
                certificate_pem: raw_s3.certificate_pem.unwrap_or(defaults.certificate_pem),
            },
            aws: AwsSettings {
                access_key_id: raw_s3.access_key_id,
                secret_access_key: raw_s3.secret_access_key,
                session_token: raw_s3.session_token,
                region: raw_s3.region,
            }
            .or(&shared_aws),
        };

        let raw_route53 = raw.route53;
        let mut route53_aws = AwsSettings {
            access_key_id: raw_route53.access_key_id,
            secret_access_key: raw_route53.secret_access_key,
            session_token: raw_route53.session_token,
            region: raw_route53.region,
        }
        .or(&shared_aws);
        if route53_aws.region.is_none() {
            route53_aws.region = Some(DEFAULT_ROUTE53_REGION.to_string());
        }
        let route53 = Route53Settings {
            hosted_zone_id: raw_route53
                .hosted_zone_id
                .map(|id| id.trim().trim_start_matches("/hostedzone/").to_string())
                .filter(|id| !id.is_empty()),
            domain: raw_route53
                .domain
                .as_deref()
                .map(normalize_identifier)
                .transpose()
                .map_err(|e| invalid(e.to_string()))?,
            aws: route53_aws,
        };

        Ok(Config {
            identifiers,
            common_name,
            contact_email,
            key_size: raw.key_size,
            renew_days: raw.renew_days,
            same_private_key_on_renew: raw.same_private_key_on_renew,
            directory_url,
            log_level: raw.log_level,
            deadline: raw.deadline_secs.map(Duration::from_secs),
            request_timeout: seconds("request_timeout_secs", raw.request_timeout_secs)?,
            retry,
            s3,
            route53,
        })
    }
}

fn positive(name: &str, count: u32) -> Result<u32, IssuanceError> {
    if count == 0 {
        return Err(IssuanceError::Config(format!("{name} must be at least 1")));
    }
    Ok(count)
}

fn seconds(name: &str, value: f64) -> Result<Duration, IssuanceError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| IssuanceError::Config(format!("{name} must be a non-negative number")))
}

fn policy(prefix: &str, count: u32, interval_secs: f64) -> Result<RetryPolicy, IssuanceError> {
    Ok(RetryPolicy::new(
        positive(&format!("{prefix}_count"), count)?,
        seconds(&format!("{prefix}_interval_secs"), interval_secs)?,
    ))
}
