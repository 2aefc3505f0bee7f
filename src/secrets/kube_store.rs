use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use log::debug;
use zeroize::Zeroizing;

use super::store::{SecretData, SecretError, SecretSource};

/// Reads secrets through the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretSource for KubeSecretStore {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<SecretData, SecretError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let qualified = format!("{namespace}/{name}");
        let secret = api
            .get_opt(name)
            .await
            .map_err(|err| SecretError::Unavailable {
                name: qualified.clone(),
                message: err.to_string(),
            })?
            .ok_or_else(|| SecretError::NotFound(qualified.clone()))?;

        let data: SecretData = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, Zeroizing::new(value.0)))
            .collect();
        debug!("[store] read secret {qualified} ({} key(s))", data.len());
        Ok(data)
    }
}
