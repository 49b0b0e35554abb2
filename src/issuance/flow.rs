use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use super::certificate::{leaf_der, not_after, renewal_due};
use super::challenge::{ChallengeCoordinator, ChallengeSettings};
use super::dns::PropagationVerifier;
use super::dns_providers::{TxtResolver, ZoneProvider};
use super::error::IssuanceError;
use super::issuer::{CertificateAuthority, CertificateRequest, OrderHandle, OrderStatus};
use super::keys::{check_private_key_pem, generate_certificate_key_pem};
use super::retry::{Cancellation, poll_until};
use super::zone::ZoneUpdater;
use crate::config::Config;
use crate::storage::{Artifact, ArtifactStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenewOutcome {
    pub renewed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevokeOutcome {
    pub revoked: bool,
}

/// External systems one lifecycle run talks to.
pub struct Collaborators<'a> {
    pub authority: &'a dyn CertificateAuthority,
    pub store: ArtifactStore<'a>,
    pub zone_provider: &'a dyn ZoneProvider,
    pub resolver: &'a dyn TxtResolver,
}

/// Decides whether a certificate is due and, if so, drives one issuance end to end.
///
/// Every run creates a fresh order. Challenge records are overwritten by upsert, so a run
/// that failed half-way is retried simply by running again.
pub struct CertificateLifecycle<'a> {
    config: &'a Config,
    collaborators: Collaborators<'a>,
    cancel: Cancellation,
}

impl<'a> CertificateLifecycle<'a> {
    pub fn new(config: &'a Config, collaborators: Collaborators<'a>, cancel: Cancellation) -> Self {
        Self {
            config,
            collaborators,
            cancel,
        }
    }

    pub fn create_or_renew(&self) -> Result<RenewOutcome, IssuanceError> {
        self.create_or_renew_at(Utc::now())
    }

    /// Same as [`Self::create_or_renew`] with an explicit clock reading.
    pub fn create_or_renew_at(&self, now: DateTime<Utc>) -> Result<RenewOutcome, IssuanceError> {
        if !self.renewal_needed(now)? {
            return Ok(RenewOutcome { renewed: false });
        }

        let authority = self.collaborators.authority;
        self.ensure_account()?;

        let order = authority.create_order(&self.config.identifiers)?;
        info!(
            "[issuance] created order {} for {}",
            order.id,
            self.config.identifiers.join(", ")
        );

        self.fulfill_challenges(&order)?;

        let private_key_pem = self.certificate_key()?;
        let request = CertificateRequest {
            common_name: self.config.common_name.clone(),
            names: self.config.identifiers.clone(),
            private_key_pem,
        };
        info!("[issuance] finalizing order {} for {}", order.id, request.common_name);
        authority.finalize(&order, &request)?;
        self.await_order(&order)?;

        let chain = authority.certificate(&order)?;
        // Key first: a certificate must never be stored without its matching key.
        let store = &self.collaborators.store;
        let common_name = Some(self.config.common_name.as_str());
        store.put(Artifact::CertificateKey, &request.private_key_pem, common_name)?;
        store.put(Artifact::Certificate, &chain, common_name)?;

        info!("[issuance] stored certificate for {}", self.config.common_name);
        Ok(RenewOutcome { renewed: true })
    }

    /// Revokes the stored certificate. A missing certificate is not an error.
    pub fn revoke(&self) -> Result<RevokeOutcome, IssuanceError> {
        let Some(certificate) = self.collaborators.store.get(Artifact::Certificate)? else {
            info!("[revoke] no stored certificate; nothing to revoke");
            return Ok(RevokeOutcome { revoked: false });
        };

        let expiry = not_after(&certificate)?;
        debug!("[revoke] stored certificate expires {}", expiry.to_rfc3339());
        let der = leaf_der(&certificate)?;

        self.ensure_account()?;
        self.collaborators.authority.revoke(&der)?;
        info!("[revoke] certificate for {} revoked", self.config.common_name);
        Ok(RevokeOutcome { revoked: true })
    }

    fn renewal_needed(&self, now: DateTime<Utc>) -> Result<bool, IssuanceError> {
        let Some(pem) = self.collaborators.store.get(Artifact::Certificate)? else {
            info!("[issuance] no stored certificate; issuing");
            return Ok(true);
        };

        let expiry = not_after(&pem)?;
        debug!("[issuance] stored certificate expires {}", expiry.to_rfc3339());
        if renewal_due(expiry, now, self.config.renew_days) {
            info!(
                "[issuance] certificate expires {} (within {} days); renewing",
                expiry.format("%Y-%m-%d %H:%M:%S %z"),
                self.config.renew_days
            );
            Ok(true)
        } else {
            info!(
                "[issuance] certificate for {} valid until {}; nothing to do",
                self.config.common_name,
                expiry.format("%Y-%m-%d %H:%M:%S %z")
            );
            Ok(false)
        }
    }

    /// Reuses the stored account, registering and persisting a new one on first use.
    fn ensure_account(&self) -> Result<(), IssuanceError> {
        let store = &self.collaborators.store;
        let authority = self.collaborators.authority;
        if let Some(account_key) = store.get(Artifact::AccountKey)? {
            authority.restore_account(&account_key)?;
            return Ok(());
        }

        info!(
            "[issuance] no account key stored; registering {}",
            self.config.contact_email
        );
        let account_key = authority.register_account(&self.config.contact_email)?;
        store.put(Artifact::AccountKey, &account_key, None)?;
        Ok(())
    }

    fn fulfill_challenges(&self, order: &OrderHandle) -> Result<(), IssuanceError> {
        let retry = &self.config.retry;
        let zone = ZoneUpdater::new(
            self.collaborators.zone_provider,
            self.config.route53.hosted_zone_id.clone(),
            retry.dns_sync,
            self.cancel.clone(),
        );
        let verifier = PropagationVerifier::new(
            self.collaborators.resolver,
            retry.resolve_timeout,
            retry.dns_propagation,
            self.cancel.clone(),
        );
        let coordinator = ChallengeCoordinator::new(
            self.collaborators.authority,
            &zone,
            &verifier,
            ChallengeSettings {
                domain_override: self.config.route53.domain.clone(),
                pending_poll: retry.challenge_pending,
                invalid_retry: retry.challenge_invalid,
            },
            self.cancel.clone(),
        );
        coordinator.fulfill_challenges(order)
    }

    fn certificate_key(&self) -> Result<String, IssuanceError> {
        if self.config.same_private_key_on_renew {
            if let Some(pem) = self.collaborators.store.get(Artifact::CertificateKey)? {
                match check_private_key_pem(&pem) {
                    Ok(()) => {
                        info!("[issuance] reusing stored certificate key");
                        return Ok(pem);
                    }
                    Err(err) => warn!("[issuance] {err}; generating a new key"),
                }
            }
        }
        debug!("[issuance] generating {}-bit RSA certificate key", self.config.key_size);
        generate_certificate_key_pem(self.config.key_size)
    }

    fn await_order(&self, order: &OrderHandle) -> Result<(), IssuanceError> {
        let authority = self.collaborators.authority;
        poll_until(
            "order",
            &self.config.retry.order,
            &self.cancel,
            |_| -> Result<Option<()>, IssuanceError> {
                match authority.order_status(order)? {
                    OrderStatus::Valid => Ok(Some(())),
                    OrderStatus::Invalid { detail } => Err(IssuanceError::OrderInvalid {
                        detail: detail.unwrap_or_else(|| "no error detail reported".to_string()),
                    }),
                    status => {
                        debug!("[order] {} is {status:?}", order.id);
                        Ok(None)
                    }
                }
            },
        )
        .map_err(|err| {
            err.into_issuance("order completion", |attempts| IssuanceError::OrderTimeout {
                attempts,
            })
        })
    }
}
