use std::time::Duration;

use clap::Parser;
use log::warn;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Runtime settings, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "step-issuer", version, about)]
pub struct Config {
    /// Sign CertificateRequests without waiting for an Approved condition.
    #[arg(long, env = "STEP_ISSUER_DISABLE_APPROVAL_CHECK")]
    pub disable_approval_check: bool,

    /// Deadline for each call to the CA, in seconds.
    #[arg(long, env = "STEP_ISSUER_HTTP_TIMEOUT_SECS", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout_secs: u64,

    /// Delay before a failed reconcile is retried, in seconds.
    #[arg(long, env = "STEP_ISSUER_REQUEUE_SECS", default_value_t = 30)]
    pub requeue_secs: u64,

    /// Namespace holding password secrets of StepClusterIssuers that do not
    /// name one.
    #[arg(long, env = "STEP_ISSUER_CLUSTER_RESOURCE_NAMESPACE", default_value = "default")]
    pub cluster_resource_namespace: String,

    /// Field manager and event reporter name.
    #[arg(long, env = "STEP_ISSUER_FIELD_MANAGER", default_value = "step-issuer")]
    pub field_manager: String,
}

impl Config {
    pub fn http_timeout(&self) -> Duration {
        if self.http_timeout_secs == 0 {
            warn!(
                "[config] http timeout of 0s is not allowed, using {DEFAULT_HTTP_TIMEOUT_SECS}s"
            );
            return Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS);
        }
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn check_approval(&self) -> bool {
        !self.disable_approval_check
    }
}
