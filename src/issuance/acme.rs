use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus as AcmeAuthorizationStatus,
    ChallengeStatus as AcmeChallengeStatus, ChallengeType, Identifier, NewAccount, NewOrder,
    Order, OrderStatus as AcmeOrderStatus, Problem, RevocationRequest,
};
use log::{debug, info};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::CertificateDer;

use super::issuer::{
    Authorization, AuthorizationStatus, CertificateAuthority, CertificateRequest,
    ChallengeStatus, DnsChallenge, IssuerError, OrderHandle, OrderStatus,
};
use super::retry::Cancellation;

pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

#[derive(Default)]
struct Session {
    account: Option<Account>,
    orders: HashMap<String, Order>,
}

/// [`CertificateAuthority`] speaking ACME through instant-acme.
///
/// Every method performs a single protocol exchange, bounded by `request_timeout` and
/// abandoned as soon as the run is cancelled. Orders are addressed by their ACME URL.
pub struct AcmeAuthority {
    directory_url: String,
    request_timeout: Duration,
    cancel: Cancellation,
    session: Mutex<Session>,
}

impl AcmeAuthority {
    pub fn new(
        directory_url: impl Into<String>,
        request_timeout: Duration,
        cancel: Cancellation,
    ) -> Self {
        Self {
            directory_url: directory_url.into(),
            request_timeout,
            cancel,
            session: Mutex::new(Session::default()),
        }
    }

    fn session(&self) -> Result<MutexGuard<'_, Session>, IssuerError> {
        self.session
            .lock()
            .map_err(|e| IssuerError::Operation(format!("acme session poisoned: {e}")))
    }

    fn call<T>(
        &self,
        what: &str,
        request: impl Future<Output = Result<T, instant_acme::Error>>,
    ) -> Result<T, IssuerError> {
        let timeout = self.request_timeout;
        let outcome = self
            .cancel
            .block_on(async move { tokio::time::timeout(timeout, request).await });
        match outcome {
            Some(Ok(Ok(value))) => Ok(value),
            Some(Ok(Err(err))) => Err(IssuerError::Operation(format!("{what} failed: {err}"))),
            Some(Err(_)) => Err(IssuerError::Unavailable(format!(
                "{what} timed out after {}ms",
                timeout.as_millis()
            ))),
            None => Err(IssuerError::Unavailable(format!("{what} cancelled"))),
        }
    }

    fn order<'s>(
        session: &'s mut Session,
        handle: &OrderHandle,
    ) -> Result<&'s mut Order, IssuerError> {
        session
            .orders
            .get_mut(&handle.id)
            .ok_or_else(|| IssuerError::Operation(format!("unknown order {}", handle.id)))
    }
}

impl CertificateAuthority for AcmeAuthority {
    fn register_account(&self, contact_email: &str) -> Result<String, IssuerError> {
        let contact = format!("mailto:{contact_email}");
        let new_account = NewAccount {
            contact: &[contact.as_str()],
            terms_of_service_agreed: true,
            only_return_existing: false,
        };
        let (account, credentials) = self.call(
            "account registration",
            Account::create(&new_account, &self.directory_url, None),
        )?;
        let serialized = serde_json::to_string(&credentials).map_err(|e| {
            IssuerError::Operation(format!("failed to serialize account credentials: {e}"))
        })?;

        info!("[acme] registered account for {contact_email} at {}", self.directory_url);
        self.session()?.account = Some(account);
        Ok(serialized)
    }

    fn restore_account(&self, account_key: &str) -> Result<(), IssuerError> {
        let credentials: AccountCredentials = serde_json::from_str(account_key).map_err(|e| {
            IssuerError::InvalidConfig(format!("stored account key is not an ACME account: {e}"))
        })?;
        let account = self.call("account restore", Account::from_credentials(credentials))?;

        debug!("[acme] reusing stored account");
        self.session()?.account = Some(account);
        Ok(())
    }

    fn create_order(&self, identifiers: &[String]) -> Result<OrderHandle, IssuerError> {
        let dns_identifiers: Vec<Identifier> = identifiers
            .iter()
            .map(|name| Identifier::Dns(name.clone()))
            .collect();

        let mut session = self.session()?;
        let account = session
            .account
            .as_ref()
            .ok_or_else(|| IssuerError::InvalidConfig("account not registered".into()))?;
        let order = self.call(
            "order creation",
            account.new_order(&NewOrder {
                identifiers: &dns_identifiers,
            }),
        )?;

        let id = order.url().to_string();
        debug!("[acme] created order {id} for {identifiers:?}");
        session.orders.insert(id.clone(), order);
        Ok(OrderHandle {
            id,
            identifiers: identifiers.to_vec(),
        })
    }

    fn authorizations(&self, handle: &OrderHandle) -> Result<Vec<Authorization>, IssuerError> {
        let mut session = self.session()?;
        let order = Self::order(&mut session, handle)?;
        let authorizations = self.call("authorization listing", order.authorizations())?;

        let mut mapped = Vec::with_capacity(authorizations.len());
        for auth in &authorizations {
            let Identifier::Dns(identifier) = &auth.identifier;
            let status = authorization_status(&auth.status);
            let Some(challenge) = auth
                .challenges
                .iter()
                .find(|challenge| challenge.r#type == ChallengeType::Dns01)
            else {
                if status == AuthorizationStatus::Pending {
                    return Err(IssuerError::Operation(format!(
                        "no dns-01 challenge offered for {identifier}"
                    )));
                }
                debug!("[acme] {identifier} is {status:?} without a dns-01 challenge");
                continue;
            };

            mapped.push(Authorization {
                identifier: identifier.clone(),
                status,
                challenge: DnsChallenge {
                    id: challenge.url.clone(),
                    identifier: identifier.clone(),
                    value: order.key_authorization(challenge).dns_value(),
                },
            });
        }
        Ok(mapped)
    }

    fn request_validation(
        &self,
        handle: &OrderHandle,
        challenge: &DnsChallenge,
    ) -> Result<(), IssuerError> {
        let mut session = self.session()?;
        let order = Self::order(&mut session, handle)?;
        self.call("challenge submission", order.set_challenge_ready(&challenge.id))?;
        debug!("[acme] submitted challenge for {}", challenge.identifier);
        Ok(())
    }

    fn challenge_status(
        &self,
        handle: &OrderHandle,
        challenge: &DnsChallenge,
    ) -> Result<ChallengeStatus, IssuerError> {
        let mut session = self.session()?;
        let order = Self::order(&mut session, handle)?;
        let authorizations = self.call("challenge status", order.authorizations())?;

        authorizations
            .iter()
            .find_map(|auth| {
                auth.challenges
                    .iter()
                    .find(|candidate| candidate.url == challenge.id)
                    .map(|found| {
                        let detail = found.error.as_ref().and_then(problem_detail);
                        challenge_status(&auth.status, &found.status, detail)
                    })
            })
            .ok_or_else(|| {
                IssuerError::Operation(format!(
                    "challenge for {} is no longer part of the order",
                    challenge.identifier
                ))
            })
    }

    fn finalize(
        &self,
        handle: &OrderHandle,
        request: &CertificateRequest,
    ) -> Result<(), IssuerError> {
        let csr = certificate_signing_request(request)?;
        let mut session = self.session()?;
        let order = Self::order(&mut session, handle)?;
        self.call("order finalization", order.finalize(&csr))?;
        debug!("[acme] submitted CSR for {}", request.common_name);
        Ok(())
    }

    fn order_status(&self, handle: &OrderHandle) -> Result<OrderStatus, IssuerError> {
        let mut session = self.session()?;
        let order = Self::order(&mut session, handle)?;
        self.call("order refresh", async { order.refresh().await.map(|_| ()) })?;

        let state = order.state();
        Ok(order_status(
            &state.status,
            state.error.as_ref().and_then(problem_detail),
        ))
    }

    fn certificate(&self, handle: &OrderHandle) -> Result<String, IssuerError> {
        let mut session = self.session()?;
        let order = Self::order(&mut session, handle)?;
        self.call("certificate download", order.certificate())?
            .ok_or_else(|| {
                IssuerError::Operation(format!("order {} has no certificate yet", handle.id))
            })
    }

    fn revoke(&self, certificate_der: &[u8]) -> Result<(), IssuerError> {
        let session = self.session()?;
        let account = session
            .account
            .as_ref()
            .ok_or_else(|| IssuerError::InvalidConfig("account not registered".into()))?;

        let certificate = CertificateDer::from(certificate_der.to_vec());
        self.call(
            "revocation",
            account.revoke(&RevocationRequest {
                certificate: &certificate,
                reason: None,
            }),
        )?;
        info!("[acme] certificate revoked");
        Ok(())
    }
}

fn authorization_status(status: &AcmeAuthorizationStatus) -> AuthorizationStatus {
    match status {
        AcmeAuthorizationStatus::Pending => AuthorizationStatus::Pending,
        AcmeAuthorizationStatus::Valid => AuthorizationStatus::Valid,
        _ => AuthorizationStatus::Invalid,
    }
}

/// Combines the authorization and challenge state. A valid authorization wins over a
/// stale challenge state; an invalid challenge carries the validator's problem detail.
fn challenge_status(
    authorization: &AcmeAuthorizationStatus,
    challenge: &AcmeChallengeStatus,
    detail: Option<String>,
) -> ChallengeStatus {
    match (authorization, challenge) {
        (AcmeAuthorizationStatus::Valid, _) | (_, AcmeChallengeStatus::Valid) => {
            ChallengeStatus::Valid
        }
        (_, AcmeChallengeStatus::Invalid) => ChallengeStatus::Invalid { detail },
        (AcmeAuthorizationStatus::Pending, AcmeChallengeStatus::Processing) => {
            ChallengeStatus::Processing
        }
        (AcmeAuthorizationStatus::Pending, AcmeChallengeStatus::Pending) => {
            ChallengeStatus::Pending
        }
        // Authorization invalid, expired or revoked while the challenge never settled.
        _ => ChallengeStatus::Invalid { detail },
    }
}

fn order_status(status: &AcmeOrderStatus, detail: Option<String>) -> OrderStatus {
    match status {
        AcmeOrderStatus::Pending => OrderStatus::Pending,
        AcmeOrderStatus::Ready => OrderStatus::Ready,
        AcmeOrderStatus::Processing => OrderStatus::Processing,
        AcmeOrderStatus::Valid => OrderStatus::Valid,
        AcmeOrderStatus::Invalid => OrderStatus::Invalid { detail },
    }
}

fn problem_detail(problem: &Problem) -> Option<String> {
    problem.detail.clone().or_else(|| problem.r#type.clone())
}

/// DER CSR for the request's names, signed with its private key.
fn certificate_signing_request(request: &CertificateRequest) -> Result<Vec<u8>, IssuerError> {
    let key = KeyPair::from_pem(&request.private_key_pem)
        .map_err(|e| IssuerError::InvalidConfig(format!("certificate key unusable: {e}")))?;
    let mut params = CertificateParams::new(request.names.clone())
        .map_err(|e| IssuerError::InvalidConfig(format!("invalid certificate names: {e}")))?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, request.common_name.clone());

    let csr = params
        .serialize_request(&key)
        .map_err(|e| IssuerError::Operation(format!("failed to build CSR: {e}")))?;
    Ok(csr.der().as_ref().to_vec())
}
