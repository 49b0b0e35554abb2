use std::time::Duration;

use log::{debug, info};

use super::dns_providers::TxtResolver;
use super::error::IssuanceError;
use super::retry::{Cancellation, RetryPolicy, poll_until};
use crate::domain::{base_domain, normalize_identifier};

pub const CHALLENGE_PREFIX: &str = "_acme-challenge";

/// TXT record name that carries the DNS-01 proof for `identifier`. Wildcard and apex
/// identifiers share one name.
pub fn record_name(identifier: &str) -> String {
    let trimmed = base_domain(identifier.trim_end_matches('.'));
    if trimmed.starts_with("_acme-challenge.") {
        trimmed.to_string()
    } else {
        format!("{CHALLENGE_PREFIX}.{trimmed}")
    }
}

/// True when every expected value is contained in at least one observed TXT string.
///
/// Resolvers may hand back values quoted or escaped, so containment rather than equality
/// decides.
pub fn values_present(expected: &[String], observed: &[String]) -> bool {
    if observed.is_empty() {
        return false;
    }
    expected
        .iter()
        .all(|value| observed.iter().any(|txt| txt.contains(value.as_str())))
}

/// Waits until the expected TXT values are visible through public DNS.
pub struct PropagationVerifier<'a> {
    resolver: &'a dyn TxtResolver,
    query_timeout: Duration,
    retry: RetryPolicy,
    cancel: Cancellation,
}

impl<'a> PropagationVerifier<'a> {
    pub fn new(
        resolver: &'a dyn TxtResolver,
        query_timeout: Duration,
        retry: RetryPolicy,
        cancel: Cancellation,
    ) -> Self {
        Self {
            resolver,
            query_timeout,
            retry,
            cancel,
        }
    }

    pub fn await_values(
        &self,
        record_name: &str,
        expected: &[String],
    ) -> Result<(), IssuanceError> {
        // Resolver lookups need the ASCII form of internationalized names.
        let query_name = normalize_identifier(record_name)
            .map_err(|e| IssuanceError::Config(e.to_string()))?;

        poll_until(
            "dns-propagation",
            &self.retry,
            &self.cancel,
            |attempt| -> Result<Option<()>, IssuanceError> {
                let observed = match self.resolver.query_txt(&query_name, self.query_timeout) {
                    Ok(values) => values,
                    Err(err) => {
                        debug!(
                            "[dns-propagation] lookup of {query_name} failed \
                             (attempt {attempt}): {err:#}"
                        );
                        Vec::new()
                    }
                };
                if values_present(expected, &observed) {
                    info!("[dns-propagation] {query_name} serves all {} value(s)", expected.len());
                    Ok(Some(()))
                } else {
                    debug!("[dns-propagation] {query_name} observed {observed:?}");
                    Ok(None)
                }
            },
        )
        .map_err(|err| {
            err.into_issuance("dns propagation", |attempts| {
                IssuanceError::PropagationTimeout {
                    record_name: record_name.to_string(),
                    attempts,
                }
            })
        })
    }
}
