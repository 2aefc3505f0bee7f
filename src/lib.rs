pub mod api;
pub mod config;
pub mod controllers;
pub mod error;
pub mod issuance;
pub mod secrets;

use std::sync::Arc;

use anyhow::Context as _;
use log::info;

use api::issuer::{StepClusterIssuer, StepIssuer};
use config::Config;
use controllers::Context;

/// Connects to the cluster and runs the three controllers until a shutdown
/// signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!(
        "[issuer] starting (approval check: {}, cluster resource namespace: {})",
        config.check_approval(),
        config.cluster_resource_namespace
    );

    let ctx = Arc::new(Context::new(client, &config));
    tokio::join!(
        controllers::issuer::run::<StepIssuer>(ctx.clone()),
        controllers::issuer::run::<StepClusterIssuer>(ctx.clone()),
        controllers::run_certificate_requests(ctx),
    );
    info!("[issuer] all controllers stopped");
    Ok(())
}
