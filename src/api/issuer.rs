//! `StepIssuer` and `StepClusterIssuer` resources.
//!
//! Both kinds share one spec shape. Controllers work against the
//! [`IssuerResource`] trait so the activation path is written once.

use std::fmt;

use k8s_openapi::ByteString;
use kube::{Api, Client, CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use super::condition::Condition;

/// API group served by this controller.
pub const GROUP: &str = "certmanager.step.sm";
pub const STEP_ISSUER_KIND: &str = "StepIssuer";
pub const STEP_CLUSTER_ISSUER_KIND: &str = "StepClusterIssuer";

/// Desired state of a namespaced `StepIssuer`.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "certmanager.step.sm",
    version = "v1beta1",
    kind = "StepIssuer",
    namespaced,
    status = "StepIssuerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StepIssuerSpec {
    /// Base URL of the step certificates instance.
    pub url: String,
    pub provisioner: StepProvisioner,
    /// PEM bundle used to verify the CA's TLS certificate. The built-in web
    /// PKI roots are used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub ca_bundle: Option<ByteString>,
}

/// Desired state of a cluster-scoped `StepClusterIssuer`.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "certmanager.step.sm",
    version = "v1beta1",
    kind = "StepClusterIssuer",
    status = "StepIssuerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StepClusterIssuerSpec {
    pub url: String,
    pub provisioner: StepProvisioner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub ca_bundle: Option<ByteString>,
}

/// JWK provisioner used to mint one-time signing tokens.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepProvisioner {
    pub name: String,
    /// `kid` of the provisioner's JWK.
    #[serde(rename = "kid")]
    pub key_id: String,
    /// Secret holding the password that decrypts the provisioner key.
    #[serde(rename = "passwordRef", alias = "passwordSecretRef")]
    pub password_ref: SecretKeySelector,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct SecretKeySelector {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct StepIssuerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Key under which an activated signer is published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IssuerIdentity {
    Namespaced { namespace: String, name: String },
    Cluster { name: String },
}

impl IssuerIdentity {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        IssuerIdentity::Namespaced {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        IssuerIdentity::Cluster { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            IssuerIdentity::Namespaced { name, .. } | IssuerIdentity::Cluster { name } => name,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            IssuerIdentity::Namespaced { namespace, .. } => Some(namespace),
            IssuerIdentity::Cluster { .. } => None,
        }
    }

    /// Name used for the client certificate requested when the CA demands
    /// mutual TLS: `<name>.<namespace>`, with an empty namespace for
    /// cluster-scoped issuers.
    pub fn bootstrap_name(&self) -> String {
        format!("{}.{}", self.name(), self.namespace().unwrap_or_default())
    }
}

impl fmt::Display for IssuerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssuerIdentity::Namespaced { namespace, name } => write!(f, "{namespace}/{name}"),
            IssuerIdentity::Cluster { name } => f.write_str(name),
        }
    }
}

/// Location of the provisioner password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

/// Scope-independent view of an issuer's spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerConfig {
    pub url: String,
    pub provisioner_name: String,
    pub key_id: String,
    pub password_ref: SecretReference,
    pub ca_bundle: Option<Vec<u8>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} cannot be empty")]
pub struct MissingField(pub &'static str);

impl IssuerConfig {
    /// Checks required fields in a fixed order; the first empty one wins.
    pub fn validate(&self) -> Result<(), MissingField> {
        let required = [
            ("spec.url", &self.url),
            ("spec.provisioner.name", &self.provisioner_name),
            ("spec.provisioner.kid", &self.key_id),
            ("spec.provisioner.passwordRef.name", &self.password_ref.name),
            ("spec.provisioner.passwordRef.key", &self.password_ref.key),
        ];
        match required.iter().find(|(_, value)| value.is_empty()) {
            Some((field, _)) => Err(MissingField(*field)),
            None => Ok(()),
        }
    }
}

fn build_config(
    url: &str,
    provisioner: &StepProvisioner,
    ca_bundle: Option<&ByteString>,
    secret_namespace: String,
) -> IssuerConfig {
    IssuerConfig {
        url: url.to_string(),
        provisioner_name: provisioner.name.clone(),
        key_id: provisioner.key_id.clone(),
        password_ref: SecretReference {
            namespace: secret_namespace,
            name: provisioner.password_ref.name.clone(),
            key: provisioner.password_ref.key.clone(),
        },
        ca_bundle: ca_bundle
            .filter(|bundle| !bundle.0.is_empty())
            .map(|bundle| bundle.0.clone()),
    }
}

/// Behaviour shared by both issuer kinds.
pub trait IssuerResource:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn identity(&self) -> IssuerIdentity;

    /// `cluster_resource_namespace` is only consulted by cluster-scoped
    /// issuers whose password reference has no namespace.
    fn issuer_config(&self, cluster_resource_namespace: &str) -> IssuerConfig;

    fn conditions(&self) -> &[Condition];

    fn kind_name() -> &'static str;

    /// API handle for reading and patching this kind. `namespace` is ignored
    /// by cluster-scoped kinds.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

impl IssuerResource for StepIssuer {
    fn identity(&self) -> IssuerIdentity {
        IssuerIdentity::namespaced(self.namespace().unwrap_or_default(), self.name_any())
    }

    fn issuer_config(&self, _cluster_resource_namespace: &str) -> IssuerConfig {
        build_config(
            &self.spec.url,
            &self.spec.provisioner,
            self.spec.ca_bundle.as_ref(),
            self.namespace().unwrap_or_default(),
        )
    }

    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    fn kind_name() -> &'static str {
        STEP_ISSUER_KIND
    }

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::default_namespaced(client),
        }
    }
}

impl IssuerResource for StepClusterIssuer {
    fn identity(&self) -> IssuerIdentity {
        IssuerIdentity::cluster(self.name_any())
    }

    fn issuer_config(&self, cluster_resource_namespace: &str) -> IssuerConfig {
        let namespace = self
            .spec
            .provisioner
            .password_ref
            .namespace
            .clone()
            .filter(|namespace| !namespace.is_empty())
            .unwrap_or_else(|| cluster_resource_namespace.to_string());
        build_config(
            &self.spec.url,
            &self.spec.provisioner,
            self.spec.ca_bundle.as_ref(),
            namespace,
        )
    }

    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    fn kind_name() -> &'static str {
        STEP_CLUSTER_ISSUER_KIND
    }

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}
