//! Credential secrets referenced by issuers.

pub mod kube_store;
pub mod store;

pub use kube_store::KubeSecretStore;
pub use store::{SecretData, SecretError, SecretSource, StaticSecrets};
