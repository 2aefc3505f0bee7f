//! Resolving the issuer a CertificateRequest points at.

use std::collections::HashMap;

use async_trait::async_trait;
use kube::Client;
use thiserror::Error;

use crate::api::condition::{CONDITION_READY, ConditionStatus, has_condition};
use crate::api::issuer::{
    IssuerIdentity, IssuerResource, STEP_CLUSTER_ISSUER_KIND, STEP_ISSUER_KIND, StepClusterIssuer,
    StepIssuer,
};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{0} not found")]
    NotFound(IssuerIdentity),
    #[error(transparent)]
    Api(#[from] kube::Error),
}

/// What the dispatcher needs to know about an issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIssuer {
    pub identity: IssuerIdentity,
    pub ready: bool,
}

#[async_trait]
pub trait IssuerLookup: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Store key for issuer `name` referenced from `request_namespace`.
    fn identity(&self, request_namespace: &str, name: &str) -> IssuerIdentity;

    async fn resolve(
        &self,
        request_namespace: &str,
        name: &str,
    ) -> Result<ResolvedIssuer, LookupError>;
}

fn resolved<K: IssuerResource>(issuer: &K) -> ResolvedIssuer {
    ResolvedIssuer {
        identity: issuer.identity(),
        ready: has_condition(issuer.conditions(), CONDITION_READY, ConditionStatus::True),
    }
}

/// `StepIssuer` in the request's own namespace.
pub struct NamespacedIssuerLookup {
    client: Client,
}

impl NamespacedIssuerLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IssuerLookup for NamespacedIssuerLookup {
    fn kind(&self) -> &'static str {
        STEP_ISSUER_KIND
    }

    fn identity(&self, request_namespace: &str, name: &str) -> IssuerIdentity {
        IssuerIdentity::namespaced(request_namespace, name)
    }

    async fn resolve(
        &self,
        request_namespace: &str,
        name: &str,
    ) -> Result<ResolvedIssuer, LookupError> {
        let api = StepIssuer::api(self.client.clone(), Some(request_namespace));
        let issuer = api
            .get_opt(name)
            .await?
            .ok_or_else(|| LookupError::NotFound(self.identity(request_namespace, name)))?;
        Ok(resolved(&issuer))
    }
}

/// Cluster-scoped `StepClusterIssuer`; the request namespace plays no part.
pub struct ClusterIssuerLookup {
    client: Client,
}

impl ClusterIssuerLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IssuerLookup for ClusterIssuerLookup {
    fn kind(&self) -> &'static str {
        STEP_CLUSTER_ISSUER_KIND
    }

    fn identity(&self, _request_namespace: &str, name: &str) -> IssuerIdentity {
        IssuerIdentity::cluster(name)
    }

    async fn resolve(
        &self,
        request_namespace: &str,
        name: &str,
    ) -> Result<ResolvedIssuer, LookupError> {
        let api = StepClusterIssuer::api(self.client.clone(), None);
        let issuer = api
            .get_opt(name)
            .await?
            .ok_or_else(|| LookupError::NotFound(self.identity(request_namespace, name)))?;
        Ok(resolved(&issuer))
    }
}

/// Both lookups, picked per request by the referenced kind.
pub struct KubeIssuerLookups {
    namespaced: NamespacedIssuerLookup,
    cluster: ClusterIssuerLookup,
}

impl KubeIssuerLookups {
    pub fn new(client: Client) -> Self {
        Self {
            namespaced: NamespacedIssuerLookup::new(client.clone()),
            cluster: ClusterIssuerLookup::new(client),
        }
    }

    /// `StepClusterIssuer` selects the cluster lookup; anything else,
    /// including an empty kind, the namespaced one.
    pub fn select(&self, kind: &str) -> &dyn IssuerLookup {
        if kind == STEP_CLUSTER_ISSUER_KIND {
            &self.cluster
        } else {
            &self.namespaced
        }
    }
}

/// In-memory issuers of one kind, keyed by identity.
pub struct StaticIssuerLookup {
    cluster: bool,
    issuers: HashMap<IssuerIdentity, bool>,
}

impl StaticIssuerLookup {
    pub fn namespaced() -> Self {
        Self {
            cluster: false,
            issuers: HashMap::new(),
        }
    }

    pub fn cluster() -> Self {
        Self {
            cluster: true,
            issuers: HashMap::new(),
        }
    }

    pub fn with_issuer(mut self, identity: IssuerIdentity, ready: bool) -> Self {
        self.issuers.insert(identity, ready);
        self
    }
}

#[async_trait]
impl IssuerLookup for StaticIssuerLookup {
    fn kind(&self) -> &'static str {
        if self.cluster {
            STEP_CLUSTER_ISSUER_KIND
        } else {
            STEP_ISSUER_KIND
        }
    }

    fn identity(&self, request_namespace: &str, name: &str) -> IssuerIdentity {
        if self.cluster {
            IssuerIdentity::cluster(name)
        } else {
            IssuerIdentity::namespaced(request_namespace, name)
        }
    }

    async fn resolve(
        &self,
        request_namespace: &str,
        name: &str,
    ) -> Result<ResolvedIssuer, LookupError> {
        let identity = self.identity(request_namespace, name);
        match self.issuers.get(&identity) {
            Some(&ready) => Ok(ResolvedIssuer { identity, ready }),
            None => Err(LookupError::NotFound(identity)),
        }
    }
}
