use anyhow::{Context, Result, anyhow};
use aws_config::SdkConfig;
use aws_sdk_route53::Client;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ChangeStatus as Route53ChangeStatus, ResourceRecord,
    ResourceRecordSet, RrType,
};
use log::{debug, info};

use super::{ChangeStatus, ZoneProvider, format_txt_content};
use crate::domain::zone_candidates;
use crate::issuance::retry::Cancellation;

const CHANGE_COMMENT: &str = "TXT records for ACME validation";

pub struct Route53Provider {
    client: Client,
    cancel: Cancellation,
}

impl Route53Provider {
    pub fn new(sdk_config: &SdkConfig, cancel: Cancellation) -> Self {
        Self {
            client: Client::new(sdk_config),
            cancel,
        }
    }

    fn run<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        self.cancel
            .block_on(call)
            .unwrap_or_else(|| Err(anyhow!("Route 53 request cancelled")))
    }

    async fn lookup_zone(&self, domain: &str) -> Result<Option<String>> {
        for candidate in zone_candidates(domain) {
            let response = self
                .client
                .list_hosted_zones_by_name()
                .dns_name(format!("{candidate}."))
                .send()
                .await
                .context("Failed to list Route 53 hosted zones")?;

            // Results start at the requested name; the first zone only counts on an exact match.
            if let Some(zone) = response.hosted_zones().first() {
                let zone_name = zone.name().trim_end_matches('.');
                if zone_name.eq_ignore_ascii_case(&candidate) {
                    let zone_id = zone.id().trim_start_matches("/hostedzone/").to_string();
                    debug!("[route53] {domain} is served by zone {zone_id} ({zone_name})");
                    return Ok(Some(zone_id));
                }
            }
        }
        Ok(None)
    }

    async fn submit_upsert(
        &self,
        zone_id: &str,
        record_name: &str,
        ttl: i64,
        values: &[String],
    ) -> Result<String> {
        let records = values
            .iter()
            .map(|value| {
                ResourceRecord::builder()
                    .value(format_txt_content(value))
                    .build()
                    .map_err(|e| anyhow!("Failed to build ResourceRecord: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let record_set = ResourceRecordSet::builder()
            .name(record_name)
            .set_resource_records(Some(records))
            .ttl(ttl)
            .set_type(Some(RrType::Txt))
            .build()
            .map_err(|e| anyhow!("Failed to build ResourceRecordSet: {}", e))?;

        let change = Change::builder()
            .action(ChangeAction::Upsert)
            .resource_record_set(record_set)
            .build()
            .map_err(|e| anyhow!("Failed to build Change: {}", e))?;

        let change_batch = ChangeBatch::builder()
            .changes(change)
            .comment(CHANGE_COMMENT)
            .build()
            .map_err(|e| anyhow!("Failed to build ChangeBatch: {}", e))?;

        let response = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(change_batch)
            .send()
            .await
            .context("Failed to upsert Route 53 TXT record set")?;

        let change_info = response
            .change_info()
            .ok_or_else(|| anyhow!("Route 53 returned no change info"))?;
        Ok(change_info.id().to_string())
    }

    async fn fetch_change_status(&self, change_id: &str) -> Result<ChangeStatus> {
        let response = self
            .client
            .get_change()
            .id(change_id)
            .send()
            .await
            .context("Failed to read Route 53 change status")?;

        let change_info = response
            .change_info()
            .ok_or_else(|| anyhow!("Route 53 returned no change info for {change_id}"))?;
        Ok(match change_info.status() {
            Route53ChangeStatus::Insync => ChangeStatus::InSync,
            _ => ChangeStatus::Pending,
        })
    }
}

impl ZoneProvider for Route53Provider {
    fn find_zone_id(&self, domain: &str) -> Result<Option<String>> {
        self.run(self.lookup_zone(domain))
    }

    fn upsert_txt_record_set(
        &self,
        zone_id: &str,
        record_name: &str,
        ttl: i64,
        values: &[String],
    ) -> Result<String> {
        info!(
            "[route53] upserting {} TXT value(s) at {record_name} in zone {zone_id}",
            values.len()
        );
        self.run(self.submit_upsert(zone_id, record_name, ttl, values))
    }

    fn change_status(&self, change_id: &str) -> Result<ChangeStatus> {
        self.run(self.fetch_change_status(change_id))
    }
}
