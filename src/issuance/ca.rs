//! Client-side contract of the certificate authority.
//!
//! The step certificates implementation lives in [`super::step`]; tests plug
//! in fakes through the same traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaError {
    /// Network failure, timeout or a server-side error; worth retrying.
    #[error("certificate authority unavailable: {0}")]
    Unavailable(String),
    /// The CA understood the request and refused it.
    #[error("certificate authority rejected the request: {0}")]
    Rejected(String),
    /// A response or local input could not be interpreted.
    #[error("certificate authority protocol error: {0}")]
    Protocol(String),
}

impl CaError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CaError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub require_client_auth: bool,
}

#[derive(Debug, Clone)]
pub struct SignRequest {
    pub csr_pem: String,
    pub token: String,
    /// Omitted from the wire request when `None`.
    pub not_after: Option<Duration>,
}

/// DER certificates returned by a successful sign call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignResponse {
    pub leaf: Vec<u8>,
    /// Intermediates in the order the CA returned them.
    pub chain: Vec<Vec<u8>>,
}

/// Client certificate and key presented on every call once installed.
pub struct ClientIdentity {
    pub certificate_chain_pem: String,
    pub private_key_pem: Zeroizing<String>,
}

/// An authenticated session with the CA.
#[async_trait]
pub trait CaClient: Send + Sync {
    /// Current trust roots as DER, in the order the CA lists them.
    async fn roots(&self) -> Result<Vec<Vec<u8>>, CaError>;

    async fn version(&self) -> Result<VersionInfo, CaError>;

    /// Mints a short-lived authorization token for `subject`. An empty `sans`
    /// list authorizes the subject alone.
    fn token(&self, subject: &str, sans: &[String]) -> Result<String, CaError>;

    async fn sign(&self, request: &SignRequest) -> Result<SignResponse, CaError>;

    /// Returns a new session that presents `identity` as its TLS client
    /// certificate. The receiver is left untouched.
    fn with_identity(&self, identity: &ClientIdentity) -> Result<Arc<dyn CaClient>, CaError>;
}

/// Everything needed to open a session.
pub struct ConnectOptions<'a> {
    pub url: &'a str,
    pub provisioner_name: &'a str,
    pub key_id: &'a str,
    pub password: &'a [u8],
    /// Replaces the built-in trust roots when set.
    pub ca_bundle: Option<&'a [u8]>,
}

/// Opens authenticated sessions. `Unavailable` means the CA could not be
/// reached; any other error means the configuration was refused.
#[async_trait]
pub trait CaConnector: Send + Sync {
    async fn connect(&self, options: &ConnectOptions<'_>) -> Result<Arc<dyn CaClient>, CaError>;
}
