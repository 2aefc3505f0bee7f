//! CertificateRequest handling: decides what to do with a request, then
//! writes the outcome to its status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use log::{debug, info, warn};

use crate::api::certificate_request::{
    CertificateRequest, CertificateRequestStatus, REASON_DENIED, REASON_FAILED, REASON_ISSUED,
    REASON_PENDING,
};
use crate::api::condition::{ConditionStatus, Transition, set_ready_condition};
use crate::api::issuer::GROUP;
use crate::error::Error;
use crate::issuance::{IssuerStore, SignError, SignedCertificate, SigningInput, sign_request};

use super::Context;
use super::lookup::IssuerLookup;
use super::status::ReadyChange;

const DENIED_MESSAGE: &str = "The CertificateRequest was denied by an approval controller";
const ISSUED_MESSAGE: &str = "Certificate issued";

/// Result of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Addressed to another issuer group.
    Ignored,
    Denied,
    WaitingApproval,
    /// Certificate already written.
    AlreadyIssued,
    /// CA certificates are not signed online.
    Skipped,
    /// Issuer missing, not ready or not activated yet.
    Pending(String),
    Failed { message: String, retryable: bool },
    Issued(SignedCertificate),
}

impl Outcome {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Outcome::Pending(_) | Outcome::Failed { retryable: true, .. }
        )
    }
}

/// Evaluates requests against the signers published in the store.
pub struct RequestDispatcher {
    store: IssuerStore,
    check_approval: bool,
}

impl RequestDispatcher {
    pub fn new(store: IssuerStore, check_approval: bool) -> Self {
        Self {
            store,
            check_approval,
        }
    }

    pub async fn dispatch(
        &self,
        request: &CertificateRequest,
        lookup: &dyn IssuerLookup,
    ) -> Outcome {
        let issuer_ref = &request.spec.issuer_ref;
        if !issuer_ref.group.is_empty() && issuer_ref.group != GROUP {
            return Outcome::Ignored;
        }
        if request.is_denied() {
            return Outcome::Denied;
        }
        if self.check_approval && !request.is_approved() {
            return Outcome::WaitingApproval;
        }
        if request.has_certificate() {
            return Outcome::AlreadyIssued;
        }
        if request.spec.is_ca {
            return Outcome::Skipped;
        }

        let namespace = request.namespace().unwrap_or_default();
        let kind = lookup.kind();
        let issuer = match lookup.resolve(&namespace, &issuer_ref.name).await {
            Ok(issuer) => issuer,
            Err(err) => {
                let identity = lookup.identity(&namespace, &issuer_ref.name);
                return Outcome::Pending(format!(
                    "Failed to retrieve {kind} resource {identity}: {err}"
                ));
            }
        };
        if !issuer.ready {
            return Outcome::Pending(format!(
                "{kind} resource {} is not Ready",
                issuer.identity
            ));
        }
        let Some(signer) = self.store.get(&issuer.identity) else {
            return Outcome::Pending(format!(
                "Failed to load provisioner for {kind} resource {}",
                issuer.identity
            ));
        };

        let duration = match request.requested_duration() {
            Ok(duration) => duration,
            Err(err) => {
                return Outcome::Failed {
                    message: format!("Failed to sign certificate request: {err}"),
                    retryable: false,
                };
            }
        };
        let input = SigningInput {
            csr: &request.spec.request.0,
            duration,
            is_ca: request.spec.is_ca,
        };
        match sign_request(&signer, input).await {
            Ok(signed) => Outcome::Issued(signed),
            Err(SignError::Unsupported) => Outcome::Skipped,
            Err(err) => Outcome::Failed {
                retryable: err.is_retryable(),
                message: format!("Failed to sign certificate request: {err}"),
            },
        }
    }
}

/// Status to persist for an outcome; `None` when nothing is written.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: CertificateRequestStatus,
    pub ready: ConditionStatus,
    pub reason: &'static str,
    pub message: String,
    pub transition: Transition,
}

impl StatusUpdate {
    pub fn ready_change(&self) -> ReadyChange<'_> {
        ReadyChange {
            status: self.ready,
            reason: self.reason,
            message: &self.message,
            transition: self.transition,
        }
    }
}

pub fn status_update(
    current: Option<&CertificateRequestStatus>,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Option<StatusUpdate> {
    let mut status = current.cloned().unwrap_or_default();
    let (ready, reason, message) = match outcome {
        Outcome::Ignored
        | Outcome::WaitingApproval
        | Outcome::AlreadyIssued
        | Outcome::Skipped => return None,
        Outcome::Denied => {
            if status.failure_time.is_none() {
                status.failure_time = Some(Time(now));
            }
            (ConditionStatus::False, REASON_DENIED, DENIED_MESSAGE.to_string())
        }
        Outcome::Pending(message) => (ConditionStatus::False, REASON_PENDING, message.clone()),
        Outcome::Failed { message, .. } => {
            (ConditionStatus::False, REASON_FAILED, message.clone())
        }
        Outcome::Issued(signed) => {
            status.certificate = Some(ByteString(signed.certificate_chain.clone()));
            status.ca = Some(ByteString(signed.ca.clone()));
            (ConditionStatus::True, REASON_ISSUED, ISSUED_MESSAGE.to_string())
        }
    };

    let update = set_ready_condition(&status.conditions, ready, reason, &message, now);
    status.conditions = update.conditions;
    Some(StatusUpdate {
        status,
        ready,
        reason,
        message,
        transition: update.transition,
    })
}

pub async fn reconcile(request: Arc<CertificateRequest>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = format!(
        "{}/{}",
        request.namespace().unwrap_or_default(),
        request.name_any()
    );
    let lookup = ctx.lookups.select(&request.spec.issuer_ref.kind);
    let outcome = ctx.dispatcher.dispatch(&request, lookup).await;

    match &outcome {
        Outcome::Ignored => debug!("[certificaterequest] {name}: issuer group not handled here"),
        Outcome::WaitingApproval => debug!("[certificaterequest] {name}: waiting for approval"),
        Outcome::AlreadyIssued => debug!("[certificaterequest] {name}: certificate already issued"),
        Outcome::Skipped => info!("[certificaterequest] {name}: CA certificates are not signed, skipping"),
        Outcome::Denied => info!("[certificaterequest] {name}: request denied"),
        Outcome::Pending(message) | Outcome::Failed { message, .. } => {
            warn!("[certificaterequest] {name}: {message}")
        }
        Outcome::Issued(_) => info!("[certificaterequest] {name}: certificate issued"),
    }

    if let Some(update) = status_update(request.status.as_ref(), &outcome, Utc::now()) {
        let namespace = request
            .namespace()
            .ok_or_else(|| Error::MissingNamespace(request.name_any()))?;
        let api: Api<CertificateRequest> = Api::namespaced(ctx.client.clone(), &namespace);
        ctx.status
            .write(&api, request.as_ref(), &update.status, update.ready_change())
            .await?;
    }

    match outcome {
        Outcome::Pending(message) | Outcome::Failed { message, retryable: true } => {
            Err(Error::Pending(message))
        }
        _ => Ok(Action::await_change()),
    }
}

pub fn error_policy(request: Arc<CertificateRequest>, err: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        "[certificaterequest] {}/{}: reconcile failed, retrying in {}s: {err}",
        request.namespace().unwrap_or_default(),
        request.name_any(),
        ctx.requeue_after.as_secs()
    );
    Action::requeue(ctx.requeue_after)
}
