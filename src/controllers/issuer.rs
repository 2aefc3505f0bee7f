//! Reconciler shared by `StepIssuer` and `StepClusterIssuer`.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use log::{debug, info, warn};

use crate::api::condition::{ConditionStatus, set_ready_condition};
use crate::api::issuer::{IssuerResource, StepIssuerStatus};
use crate::error::Error;

use super::Context;
use super::status::ReadyChange;

pub const REASON_VERIFIED: &str = "Verified";

pub fn ready_message(kind: &str) -> String {
    format!("{kind} verified and ready to sign certificates")
}

/// Activates the issuer, publishes its signer and reports Ready.
pub async fn reconcile<K: IssuerResource>(
    issuer: Arc<K>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let identity = issuer.identity();
    let kind = K::kind_name();
    let config = issuer.issuer_config(&ctx.cluster_resource_namespace);
    debug!("[issuer] reconciling {kind} {identity}");

    match ctx.activator.activate(&identity, &config).await {
        Ok(signer) => {
            ctx.store.put(identity.clone(), signer);
            info!("[issuer] {kind} {identity} activated");
            write_ready(
                issuer.as_ref(),
                &ctx,
                ConditionStatus::True,
                REASON_VERIFIED,
                &ready_message(kind),
            )
            .await?;
            Ok(Action::await_change())
        }
        Err(err) => {
            warn!("[issuer] {kind} {identity} failed to activate: {err}");
            write_ready(
                issuer.as_ref(),
                &ctx,
                ConditionStatus::False,
                err.reason(),
                &err.to_string(),
            )
            .await?;
            if err.is_retryable() {
                Err(Error::Activation(err))
            } else {
                Ok(Action::await_change())
            }
        }
    }
}

async fn write_ready<K: IssuerResource>(
    issuer: &K,
    ctx: &Context,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Result<(), Error> {
    let update = set_ready_condition(issuer.conditions(), status, reason, message, Utc::now());
    let api = K::api(ctx.client.clone(), issuer.namespace().as_deref());
    let new_status = StepIssuerStatus {
        conditions: update.conditions,
    };
    ctx.status
        .write(
            &api,
            issuer,
            &new_status,
            ReadyChange {
                status,
                reason,
                message,
                transition: update.transition,
            },
        )
        .await
}

pub fn error_policy<K: IssuerResource>(issuer: Arc<K>, err: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        "[issuer] {} {}: reconcile failed, retrying in {}s: {err}",
        K::kind_name(),
        issuer.identity(),
        ctx.requeue_after.as_secs()
    );
    Action::requeue(ctx.requeue_after)
}

/// Watches every object of kind `K` until shutdown.
pub async fn run<K: IssuerResource>(ctx: Arc<Context>) {
    let api: Api<K> = Api::all(ctx.client.clone());
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!("[issuer] reconciled {}", object.name),
                Err(err) => debug!("[issuer] reconcile error: {err}"),
            }
        })
        .await;
    info!("[issuer] {} controller stopped", K::kind_name());
}
