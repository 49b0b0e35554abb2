use log::info;

use super::dns_providers::{ChangeStatus, ZoneProvider};
use super::error::IssuanceError;
use super::retry::{Cancellation, RetryPolicy, poll_until};

/// Low TTL so later upserts of the same name propagate quickly.
pub const CHALLENGE_TTL: i64 = 60;

/// Publishes challenge TXT record sets and waits for the provider to report them in sync.
pub struct ZoneUpdater<'a> {
    provider: &'a dyn ZoneProvider,
    hosted_zone_id: Option<String>,
    sync: RetryPolicy,
    cancel: Cancellation,
}

impl<'a> ZoneUpdater<'a> {
    pub fn new(
        provider: &'a dyn ZoneProvider,
        hosted_zone_id: Option<String>,
        sync: RetryPolicy,
        cancel: Cancellation,
    ) -> Self {
        Self {
            provider,
            hosted_zone_id,
            sync,
            cancel,
        }
    }

    /// Replaces the TXT set at `record_name` with all of `values` in one change.
    pub fn upsert(
        &self,
        domain: &str,
        record_name: &str,
        values: &[String],
    ) -> Result<(), IssuanceError> {
        let zone_id = self.resolve_zone(domain)?;
        let change_id = self
            .provider
            .upsert_txt_record_set(&zone_id, record_name, CHALLENGE_TTL, values)
            .map_err(provider_error)?;
        info!("[route53] submitted change {change_id} for {record_name}");

        poll_until("route53", &self.sync, &self.cancel, |_| {
            match self.provider.change_status(&change_id) {
                Ok(ChangeStatus::InSync) => Ok(Some(())),
                Ok(ChangeStatus::Pending) => Ok(None),
                Err(err) => Err(provider_error(err)),
            }
        })
        .map_err(|err| {
            err.into_issuance("zone sync", |attempts| IssuanceError::ZonePropagation {
                record_name: record_name.to_string(),
                attempts,
            })
        })?;

        info!("[route53] change {change_id} for {record_name} is in sync");
        Ok(())
    }

    fn resolve_zone(&self, domain: &str) -> Result<String, IssuanceError> {
        if let Some(zone_id) = &self.hosted_zone_id {
            return Ok(zone_id.clone());
        }
        self.provider
            .find_zone_id(domain)
            .map_err(provider_error)?
            .ok_or_else(|| IssuanceError::ZoneLookup {
                domain: domain.to_string(),
            })
    }
}

fn provider_error(err: anyhow::Error) -> IssuanceError {
    IssuanceError::ZoneProvider(format!("{err:#}"))
}
