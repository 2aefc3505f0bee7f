//! kube-runtime controllers for issuers and CertificateRequests.
//!
//! Issuer reconciles publish signers into the shared [`IssuerStore`];
//! CertificateRequest reconciles only read from it.

pub mod certificate_request;
pub mod issuer;
pub mod lookup;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client};
use log::{debug, info};

use crate::api::certificate_request::CertificateRequest;
use crate::config::Config;
use crate::issuance::{IssuerActivator, IssuerStore, StepCaConnector};
use crate::secrets::KubeSecretStore;

use certificate_request::RequestDispatcher;
use lookup::KubeIssuerLookups;
use status::StatusWriter;

/// State shared by every reconcile call.
pub struct Context {
    pub client: Client,
    pub store: IssuerStore,
    pub activator: IssuerActivator,
    pub dispatcher: RequestDispatcher,
    pub lookups: KubeIssuerLookups,
    pub status: StatusWriter,
    pub cluster_resource_namespace: String,
    pub requeue_after: Duration,
}

impl Context {
    pub fn new(client: Client, config: &Config) -> Self {
        let store = IssuerStore::new();
        let activator = IssuerActivator::new(
            Arc::new(StepCaConnector::new(config.http_timeout())),
            Arc::new(KubeSecretStore::new(client.clone())),
        );
        Self {
            store: store.clone(),
            activator,
            dispatcher: RequestDispatcher::new(store, config.check_approval()),
            lookups: KubeIssuerLookups::new(client.clone()),
            status: StatusWriter::new(client.clone(), config.field_manager.clone()),
            cluster_resource_namespace: config.cluster_resource_namespace.clone(),
            requeue_after: config.requeue_after(),
            client,
        }
    }
}

/// Watches CertificateRequests in every namespace until shutdown.
pub async fn run_certificate_requests(ctx: Arc<Context>) {
    let api: Api<CertificateRequest> = Api::all(ctx.client.clone());
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            certificate_request::reconcile,
            certificate_request::error_policy,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!("[certificaterequest] reconciled {object}"),
                Err(err) => debug!("[certificaterequest] reconcile error: {err}"),
            }
        })
        .await;
    info!("[certificaterequest] controller stopped");
}
