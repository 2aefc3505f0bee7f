use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors produced by secret backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret {0} not found")]
    NotFound(String),
    #[error("failed to read secret {name}: {message}")]
    Unavailable { name: String, message: String },
}

pub type SecretData = BTreeMap<String, Zeroizing<Vec<u8>>>;

/// Read-only access to credential secrets.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Returns every key of the secret `namespace/name`.
    async fn fetch(&self, namespace: &str, name: &str) -> Result<SecretData, SecretError>;
}

/// Fixed set of secrets held in memory.
#[derive(Default)]
pub struct StaticSecrets {
    secrets: BTreeMap<(String, String), SecretData>,
    failure: Option<String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, namespace: &str, name: &str, key: &str, value: &[u8]) -> Self {
        self.secrets
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        self
    }

    /// Makes every lookup fail as if the API server were unreachable.
    pub fn unavailable(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }
}

#[async_trait]
impl SecretSource for StaticSecrets {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<SecretData, SecretError> {
        let qualified = format!("{namespace}/{name}");
        if let Some(message) = &self.failure {
            return Err(SecretError::Unavailable {
                name: qualified,
                message: message.clone(),
            });
        }
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or(SecretError::NotFound(qualified))
    }
}
