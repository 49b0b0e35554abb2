use log::{debug, error, info, warn};

use super::dns::{PropagationVerifier, record_name};
use super::error::IssuanceError;
use super::issuer::{
    Authorization, AuthorizationStatus, CertificateAuthority, ChallengeStatus, DnsChallenge,
    OrderHandle,
};
use super::retry::{Cancellation, RetryPolicy, poll_until};
use super::zone::ZoneUpdater;
use crate::domain::base_domain;

/// A challenge still awaiting proof, paired with the identifier that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    pub identifier: String,
    pub record_name: String,
    pub challenge: DnsChallenge,
}

/// Challenges that publish to the same TXT name. One upsert replaces the whole set at a
/// name, so a group is always published with all of its values together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecordGroup {
    pub record_name: String,
    pub challenges: Vec<PendingChallenge>,
}

impl DnsRecordGroup {
    /// Distinct TXT values of the group, in challenge order.
    pub fn values(&self) -> Vec<String> {
        let mut values: Vec<String> = Vec::with_capacity(self.challenges.len());
        for pending in &self.challenges {
            if !values.contains(&pending.challenge.value) {
                values.push(pending.challenge.value.clone());
            }
        }
        values
    }

    /// Domain used for hosted zone lookup: the first identifier without wildcard label.
    pub fn domain(&self) -> &str {
        self.challenges
            .first()
            .map(|pending| base_domain(&pending.identifier))
            .unwrap_or(self.record_name.as_str())
    }
}

/// Keeps only `pending` authorizations and derives the record each one publishes to.
pub fn pending_challenges(authorizations: Vec<Authorization>) -> Vec<PendingChallenge> {
    authorizations
        .into_iter()
        .filter(|auth| {
            let pending = auth.status == AuthorizationStatus::Pending;
            if !pending {
                debug!(
                    "[challenge] skipping {} with status {:?}",
                    auth.identifier, auth.status
                );
            }
            pending
        })
        .map(|auth| PendingChallenge {
            record_name: record_name(&auth.identifier),
            identifier: auth.identifier,
            challenge: auth.challenge,
        })
        .collect()
}

/// Groups challenges by record name, keeping first-seen order of both groups and members.
pub fn group_by_record_name(pending: Vec<PendingChallenge>) -> Vec<DnsRecordGroup> {
    let mut groups: Vec<DnsRecordGroup> = Vec::new();
    for challenge in pending {
        match groups
            .iter_mut()
            .find(|group| group.record_name == challenge.record_name)
        {
            Some(group) => group.challenges.push(challenge),
            None => groups.push(DnsRecordGroup {
                record_name: challenge.record_name.clone(),
                challenges: vec![challenge],
            }),
        }
    }
    groups
}

#[derive(Debug, Clone)]
pub struct ChallengeSettings {
    /// Zone lookup domain used instead of each identifier's own, for delegated validation.
    pub domain_override: Option<String>,
    /// Budget for a challenge to leave `pending`/`processing`.
    pub pending_poll: RetryPolicy,
    /// Re-polls granted after a challenge first reports `invalid`.
    pub invalid_retry: RetryPolicy,
}

/// Publishes DNS-01 proofs for an order and drives every challenge to `valid`.
pub struct ChallengeCoordinator<'a> {
    authority: &'a dyn CertificateAuthority,
    zone: &'a ZoneUpdater<'a>,
    verifier: &'a PropagationVerifier<'a>,
    settings: ChallengeSettings,
    cancel: Cancellation,
}

impl<'a> ChallengeCoordinator<'a> {
    pub fn new(
        authority: &'a dyn CertificateAuthority,
        zone: &'a ZoneUpdater<'a>,
        verifier: &'a PropagationVerifier<'a>,
        settings: ChallengeSettings,
        cancel: Cancellation,
    ) -> Self {
        Self {
            authority,
            zone,
            verifier,
            settings,
            cancel,
        }
    }

    pub fn fulfill_challenges(&self, order: &OrderHandle) -> Result<(), IssuanceError> {
        let pending = pending_challenges(self.authority.authorizations(order)?);
        if pending.is_empty() {
            info!("[challenge] no pending authorizations for {}", order.id);
            return Ok(());
        }

        let groups = group_by_record_name(pending);
        info!(
            "[challenge] publishing {} record group(s) for {}",
            groups.len(),
            order.id
        );

        for group in &groups {
            let domain = self
                .settings
                .domain_override
                .as_deref()
                .unwrap_or_else(|| group.domain());
            let values = group.values();
            self.zone.upsert(domain, &group.record_name, &values)?;
            self.verifier.await_values(&group.record_name, &values)?;
        }

        let challenges: Vec<&PendingChallenge> =
            groups.iter().flat_map(|group| &group.challenges).collect();
        for pending in &challenges {
            debug!("[challenge] requesting validation for {}", pending.identifier);
            self.authority
                .request_validation(order, &pending.challenge)?;
        }
        for pending in &challenges {
            self.await_valid(order, pending)?;
        }

        info!("[challenge] all {} challenge(s) valid", challenges.len());
        Ok(())
    }

    fn await_valid(
        &self,
        order: &OrderHandle,
        pending: &PendingChallenge,
    ) -> Result<(), IssuanceError> {
        let identifier = pending.identifier.as_str();
        let settled = poll_until(
            "challenge",
            &self.settings.pending_poll,
            &self.cancel,
            |_| -> Result<Option<ChallengeStatus>, IssuanceError> {
                match self.authority.challenge_status(order, &pending.challenge)? {
                    ChallengeStatus::Pending | ChallengeStatus::Processing => Ok(None),
                    status => Ok(Some(status)),
                }
            },
        )
        .map_err(|err| {
            err.into_issuance("challenge validation", |attempts| {
                IssuanceError::ChallengeTimeout {
                    identifier: identifier.to_string(),
                    attempts,
                }
            })
        })?;

        let mut last_detail = match settled {
            ChallengeStatus::Valid => {
                info!("[challenge] {identifier} is valid");
                return Ok(());
            }
            ChallengeStatus::Invalid { detail } => detail,
            ChallengeStatus::Pending | ChallengeStatus::Processing => None,
        };
        let backoff = self.settings.invalid_retry.interval;
        warn!(
            "[challenge] {identifier} reported invalid ({}); re-checking in {}ms",
            last_detail.as_deref().unwrap_or("no detail"),
            backoff.as_millis()
        );

        // Validators sometimes report a transient invalid before settling on valid.
        if !self.cancel.sleep(backoff) {
            return Err(IssuanceError::Cancelled {
                stage: "challenge validation".to_string(),
            });
        }
        let outcome = poll_until(
            "challenge-retry",
            &self.settings.invalid_retry,
            &self.cancel,
            |_| -> Result<Option<()>, IssuanceError> {
                match self.authority.challenge_status(order, &pending.challenge)? {
                    ChallengeStatus::Valid => Ok(Some(())),
                    ChallengeStatus::Invalid { detail } => {
                        if detail.is_some() {
                            last_detail = detail;
                        }
                        Ok(None)
                    }
                    ChallengeStatus::Pending | ChallengeStatus::Processing => Ok(None),
                }
            },
        );

        match outcome {
            Ok(()) => {
                info!("[challenge] {identifier} became valid on re-check");
                Ok(())
            }
            Err(err) => Err(err.into_issuance("challenge validation", |_| {
                let detail = last_detail
                    .clone()
                    .unwrap_or_else(|| "no error detail reported".to_string());
                error!("[challenge] {identifier} failed validation: {detail}");
                IssuanceError::ChallengeValidation {
                    identifier: identifier.to_string(),
                    detail,
                }
            })),
        }
    }
}
