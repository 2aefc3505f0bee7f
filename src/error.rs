use thiserror::Error;

use crate::issuance::ActivationError;

/// Error returned from a reconcile pass. Every variant asks the controller
/// runtime to requeue the object.
#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("failed to serialize status: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Activation(#[from] ActivationError),
    /// The request is not finished yet; the message is already on its status.
    #[error("{0}")]
    Pending(String),
    #[error("{0} has no namespace")]
    MissingNamespace(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
