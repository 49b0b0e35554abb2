use std::time::Duration;

use anyhow::Result;

mod doh;
mod route53;

pub use doh::{DohResolver, GOOGLE_DOH_ENDPOINT};
pub use route53::Route53Provider;

/// Asynchronous replication state of a submitted zone change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Pending,
    InSync,
}

/// Authoritative zone management for the hosted zone that owns the challenge records.
pub trait ZoneProvider: Send + Sync {
    /// Finds the hosted zone managing `domain`, if any.
    fn find_zone_id(&self, domain: &str) -> Result<Option<String>>;
    /// Replaces the TXT record set at `record_name` with `values` and returns the change id.
    fn upsert_txt_record_set(
        &self,
        zone_id: &str,
        record_name: &str,
        ttl: i64,
        values: &[String],
    ) -> Result<String>;
    fn change_status(&self, change_id: &str) -> Result<ChangeStatus>;
}

/// Public DNS resolution used to confirm that records are visible outside the provider.
pub trait TxtResolver: Send + Sync {
    /// Returns the TXT strings at `name`. An empty list means the name has no TXT data yet.
    fn query_txt(&self, name: &str, timeout: Duration) -> Result<Vec<String>>;
}

pub(crate) fn format_txt_content(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed.to_string()
    } else {
        format!("\"{}\"", trimmed.trim_matches('"'))
    }
}
