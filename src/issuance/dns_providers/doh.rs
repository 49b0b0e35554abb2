use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use serde::Deserialize;

use super::TxtResolver;

pub const GOOGLE_DOH_ENDPOINT: &str = "https://dns.google/resolve";

const TXT_RECORD_TYPE: u16 = 16;
const STATUS_NOERROR: u32 = 0;
const STATUS_NXDOMAIN: u32 = 3;

/// Resolves TXT records through a DNS-over-HTTPS JSON endpoint.
pub struct DohResolver {
    endpoint: String,
}

impl DohResolver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Default for DohResolver {
    fn default() -> Self {
        Self::new(GOOGLE_DOH_ENDPOINT)
    }
}

impl TxtResolver for DohResolver {
    fn query_txt(&self, name: &str, timeout: Duration) -> Result<Vec<String>> {
        let url = format!("{}?name={}&type=TXT", self.endpoint, name);
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let body = agent
            .get(&url)
            .set("Accept", "application/dns-json")
            .call()
            .with_context(|| format!("Failed to query {} for {name}", self.endpoint))?
            .into_string()
            .context("Failed to read DNS-over-HTTPS response body")?;

        let response: DohResponse =
            serde_json::from_str(&body).context("Failed to parse DNS-over-HTTPS response")?;
        debug!(
            "[doh] {name}: status={}, answers={}",
            response.status,
            response.answer.as_ref().map(Vec::len).unwrap_or(0)
        );
        txt_answers(name, &response)
    }
}

fn txt_answers(name: &str, response: &DohResponse) -> Result<Vec<String>> {
    match response.status {
        STATUS_NOERROR => Ok(response
            .answer
            .iter()
            .flatten()
            .filter(|answer| answer.record_type == TXT_RECORD_TYPE)
            .filter_map(|answer| answer.data.clone())
            .collect()),
        STATUS_NXDOMAIN => Ok(Vec::new()),
        status => {
            warn!("[doh] unexpected status {status} for {name}");
            Err(anyhow!("resolver returned status {status} for {name}"))
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    #[serde(rename = "data")]
    data: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer")]
    answer: Option<Vec<DohAnswer>>,
}
