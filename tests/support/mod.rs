#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use rcgen::{CertificateParams, KeyPair, date_time_ymd};

use acme_dns_renew::Config;
use acme_dns_renew::issuance::dns_providers::{ChangeStatus, TxtResolver, ZoneProvider};
use acme_dns_renew::issuance::issuer::{
    Authorization, AuthorizationStatus, CertificateAuthority, CertificateRequest, ChallengeStatus,
    DnsChallenge, IssuerError, OrderHandle, OrderStatus,
};
use acme_dns_renew::storage::{ObjectMetadata, ObjectStore, StoreError};

/// Ordered record of every side effect the fakes observe.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|entry| entry.starts_with(prefix))
    }

    pub fn last_position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().rposition(|entry| entry.starts_with(prefix))
    }
}

pub fn config(extra: &str) -> Config {
    let toml = format!(
        r#"
        domains = ["example.com", "*.example.com", "www.example.com"]
        contact_email = "ops@example.com"
        dns_retry_count = 3
        dns_retry_interval_secs = 0.0
        cert_retry_count = 3
        cert_retry_interval_secs = 0.0
        challenge_retry_count = 2
        challenge_retry_interval_secs = 0.0
        challenge_poll_count = 5
        challenge_poll_interval_millis = 0
        {extra}

        [s3]
        bucket = "certs"

        [route53]
        hosted_zone_id = "Z123"
        "#
    );
    Config::from_toml_str(&toml, |_| None).unwrap()
}

pub fn certificate_expiring(year: i32, month: u8, day: u8) -> String {
    let mut params = CertificateParams::new(vec!["example.com".to_string()]).unwrap();
    params.not_before = date_time_ymd(2024, 1, 1);
    params.not_after = date_time_ymd(year, month, day);
    let key = KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().pem()
}

pub fn midnight(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashMap<String, (Vec<u8>, Option<ObjectMetadata>)>>,
    pub journal: Journal,
}

impl MemoryStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            journal,
        }
    }

    pub fn seed(&self, key: &str, body: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body.as_bytes().to_vec(), None));
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(body, _)| String::from_utf8(body.clone()).unwrap())
    }

    pub fn metadata(&self, key: &str) -> Option<ObjectMetadata> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .and_then(|(_, metadata)| metadata.clone())
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(body, _)| body.clone()))
    }

    fn put(&self, key: &str, body: &[u8], metadata: &ObjectMetadata) -> Result<(), StoreError> {
        self.journal.push(format!("put:{key}"));
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body.to_vec(), Some(metadata.clone())));
        Ok(())
    }
}

/// Zone whose published TXT sets are immediately visible to [`PublishedResolver`].
pub struct FakeZone {
    pub records: Mutex<HashMap<String, Vec<String>>>,
    pub in_sync: bool,
    pub status_checks: Mutex<u32>,
    pub journal: Journal,
}

impl FakeZone {
    pub fn new(journal: Journal) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            in_sync: true,
            status_checks: Mutex::new(0),
            journal,
        }
    }
}

impl ZoneProvider for FakeZone {
    fn find_zone_id(&self, _domain: &str) -> Result<Option<String>> {
        Ok(Some("Z123".to_string()))
    }

    fn upsert_txt_record_set(
        &self,
        zone_id: &str,
        record_name: &str,
        _ttl: i64,
        values: &[String],
    ) -> Result<String> {
        self.journal
            .push(format!("upsert:{record_name}:{}", values.join(",")));
        self.records.lock().unwrap().insert(
            record_name.to_string(),
            values.iter().map(|v| format!("\"{v}\"")).collect(),
        );
        Ok(format!("/change/{zone_id}-{record_name}"))
    }

    fn change_status(&self, _change_id: &str) -> Result<ChangeStatus> {
        *self.status_checks.lock().unwrap() += 1;
        Ok(if self.in_sync {
            ChangeStatus::InSync
        } else {
            ChangeStatus::Pending
        })
    }
}

/// Record names in the order a resolver was asked for them.
#[derive(Default)]
pub struct QueryLog(Mutex<Vec<String>>);

impl QueryLog {
    pub fn count(&self, name: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|queried| *queried == name).count()
    }

    pub fn total(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Resolver that sees exactly what [`FakeZone`] has published.
pub struct PublishedResolver<'a> {
    pub zone: &'a FakeZone,
    pub queries: &'a QueryLog,
}

impl TxtResolver for PublishedResolver<'_> {
    fn query_txt(&self, name: &str, _timeout: Duration) -> Result<Vec<String>> {
        self.queries.0.lock().unwrap().push(name.to_string());
        Ok(self
            .zone
            .records
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Authority with one pending DNS challenge per identifier. Challenge statuses follow a
/// per-identifier script whose last entry repeats; unscripted challenges are valid.
pub struct FakeAuthority {
    pub identifiers: Mutex<Vec<String>>,
    pub scripts: Mutex<HashMap<String, VecDeque<ChallengeStatus>>>,
    pub final_status: OrderStatus,
    pub certificate_pem: String,
    pub finalized: Mutex<Vec<CertificateRequest>>,
    pub restored_accounts: Mutex<Vec<String>>,
    pub revoked: Mutex<Vec<Vec<u8>>>,
    pub journal: Journal,
}

impl FakeAuthority {
    pub fn new(journal: Journal, certificate_pem: String) -> Self {
        Self {
            identifiers: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            final_status: OrderStatus::Valid,
            certificate_pem,
            finalized: Mutex::new(Vec::new()),
            restored_accounts: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
            journal,
        }
    }

    pub fn script(&self, identifier: &str, statuses: Vec<ChallengeStatus>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(identifier.to_string(), statuses.into());
    }

    fn token(identifier: &str) -> String {
        format!("token-{}", identifier.replace("*.", "wild."))
    }
}

impl CertificateAuthority for FakeAuthority {
    fn register_account(&self, contact_email: &str) -> Result<String, IssuerError> {
        self.journal.push("register");
        Ok(format!("{{\"contact\":\"mailto:{contact_email}\"}}"))
    }

    fn restore_account(&self, account_key: &str) -> Result<(), IssuerError> {
        self.journal.push("restore");
        self.restored_accounts
            .lock()
            .unwrap()
            .push(account_key.to_string());
        Ok(())
    }

    fn create_order(&self, identifiers: &[String]) -> Result<OrderHandle, IssuerError> {
        self.journal.push("create_order");
        *self.identifiers.lock().unwrap() = identifiers.to_vec();
        Ok(OrderHandle {
            id: "order-1".to_string(),
            identifiers: identifiers.to_vec(),
        })
    }

    fn authorizations(&self, _order: &OrderHandle) -> Result<Vec<Authorization>, IssuerError> {
        Ok(self
            .identifiers
            .lock()
            .unwrap()
            .iter()
            .map(|identifier| Authorization {
                identifier: identifier.clone(),
                status: AuthorizationStatus::Pending,
                challenge: DnsChallenge {
                    id: format!("chall-{identifier}"),
                    identifier: identifier.clone(),
                    value: Self::token(identifier),
                },
            })
            .collect())
    }

    fn request_validation(
        &self,
        _order: &OrderHandle,
        challenge: &DnsChallenge,
    ) -> Result<(), IssuerError> {
        self.journal
            .push(format!("validate:{}", challenge.identifier));
        Ok(())
    }

    fn challenge_status(
        &self,
        _order: &OrderHandle,
        challenge: &DnsChallenge,
    ) -> Result<ChallengeStatus, IssuerError> {
        self.journal.push(format!("status:{}", challenge.identifier));
        let mut scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.get_mut(&challenge.identifier) else {
            return Ok(ChallengeStatus::Valid);
        };
        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(status.unwrap_or(ChallengeStatus::Valid))
    }

    fn finalize(
        &self,
        _order: &OrderHandle,
        request: &CertificateRequest,
    ) -> Result<(), IssuerError> {
        self.journal.push("finalize");
        self.finalized.lock().unwrap().push(request.clone());
        Ok(())
    }

    fn order_status(&self, _order: &OrderHandle) -> Result<OrderStatus, IssuerError> {
        self.journal.push("order_status");
        Ok(self.final_status.clone())
    }

    fn certificate(&self, _order: &OrderHandle) -> Result<String, IssuerError> {
        self.journal.push("certificate");
        Ok(self.certificate_pem.clone())
    }

    fn revoke(&self, certificate_der: &[u8]) -> Result<(), IssuerError> {
        self.journal.push("revoke");
        self.revoked.lock().unwrap().push(certificate_der.to_vec());
        Ok(())
    }
}
