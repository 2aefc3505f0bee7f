//! Validates an issuer and opens its CA session.

use std::sync::Arc;

use log::{debug, info, warn};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::api::issuer::{IssuerConfig, IssuerIdentity};
use crate::secrets::{SecretError, SecretSource};

use super::ca::{CaClient, CaConnector, CaError, ClientIdentity, ConnectOptions, SignRequest};
use super::csr::encode_pem_blocks;
use super::signer::Signer;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivationError {
    /// The issuer spec must be fixed before anything else can happen.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Transient(String),
    #[error("failed to bootstrap client certificate: {0}")]
    Bootstrap(String),
}

impl ActivationError {
    /// Condition reason written to the issuer.
    pub fn reason(&self) -> &'static str {
        match self {
            ActivationError::Validation(_) => "Validation",
            ActivationError::NotFound(_) => "NotFound",
            ActivationError::Transient(_) => "Transient",
            ActivationError::Bootstrap(_) => "Error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ActivationError::Validation(_))
    }
}

impl From<SecretError> for ActivationError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::NotFound(_) => ActivationError::NotFound(err.to_string()),
            SecretError::Unavailable { .. } => ActivationError::Transient(err.to_string()),
        }
    }
}

pub struct IssuerActivator {
    connector: Arc<dyn CaConnector>,
    secrets: Arc<dyn SecretSource>,
}

impl IssuerActivator {
    pub fn new(connector: Arc<dyn CaConnector>, secrets: Arc<dyn SecretSource>) -> Self {
        Self { connector, secrets }
    }

    /// Builds a signer for `identity`. The caller publishes it; nothing is
    /// stored here.
    pub async fn activate(
        &self,
        identity: &IssuerIdentity,
        config: &IssuerConfig,
    ) -> Result<Signer, ActivationError> {
        config
            .validate()
            .map_err(|err| ActivationError::Validation(err.to_string()))?;

        let secret_ref = &config.password_ref;
        let data = self
            .secrets
            .fetch(&secret_ref.namespace, &secret_ref.name)
            .await?;
        let password = data.get(&secret_ref.key).ok_or_else(|| {
            ActivationError::NotFound(format!(
                "secret {}/{} does not contain key {}",
                secret_ref.namespace, secret_ref.name, secret_ref.key
            ))
        })?;

        let options = ConnectOptions {
            url: &config.url,
            provisioner_name: &config.provisioner_name,
            key_id: &config.key_id,
            password,
            ca_bundle: config.ca_bundle.as_deref(),
        };
        let client = self.connector.connect(&options).await.map_err(|err| match err {
            CaError::Unavailable(_) => ActivationError::Transient(err.to_string()),
            other => ActivationError::Validation(other.to_string()),
        })?;

        let require_client_auth = match client.version().await {
            Ok(version) => {
                debug!(
                    "[issuer] {identity}: CA version {} (client auth required: {})",
                    version.version, version.require_client_auth
                );
                version.require_client_auth
            }
            Err(err) => {
                warn!("[issuer] {identity}: failed to query CA version, skipping client auth: {err}");
                false
            }
        };

        let client = if require_client_auth {
            let authenticated = bootstrap_identity(client.as_ref(), &identity.bootstrap_name())
                .await
                .map_err(ActivationError::Bootstrap)?;
            info!("[issuer] {identity}: installed client certificate");
            authenticated
        } else {
            client
        };

        Ok(Signer::new(identity.clone(), client))
    }
}

/// Obtains a client certificate for `name` and returns a session presenting
/// it.
async fn bootstrap_identity(
    client: &dyn CaClient,
    name: &str,
) -> Result<Arc<dyn CaClient>, String> {
    let key = KeyPair::generate().map_err(|err| format!("failed to generate key: {err}"))?;
    let mut params = CertificateParams::new(vec![name.to_string()])
        .map_err(|err| format!("invalid identity name {name}: {err}"))?;
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, name);
    let csr_pem = params
        .serialize_request(&key)
        .and_then(|csr| csr.pem())
        .map_err(|err| format!("failed to create certificate request: {err}"))?;

    let token = client.token(name, &[]).map_err(|err| err.to_string())?;
    let response = client
        .sign(&SignRequest {
            csr_pem,
            token,
            not_after: None,
        })
        .await
        .map_err(|err| err.to_string())?;

    let mut chain = vec![response.leaf];
    chain.extend(response.chain);
    let identity = ClientIdentity {
        certificate_chain_pem: encode_pem_blocks("CERTIFICATE", &chain),
        private_key_pem: Zeroizing::new(key.serialize_pem()),
    };
    client
        .with_identity(&identity)
        .map_err(|err| err.to_string())
}
