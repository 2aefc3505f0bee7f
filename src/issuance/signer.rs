use std::fmt;
use std::sync::Arc;

use crate::api::issuer::IssuerIdentity;

use super::ca::CaClient;

/// An authenticated CA session bound to one issuer. Never mutated once it is
/// published; re-activation builds a new one.
#[derive(Clone)]
pub struct Signer {
    identity: IssuerIdentity,
    client: Arc<dyn CaClient>,
}

impl Signer {
    pub fn new(identity: IssuerIdentity, client: Arc<dyn CaClient>) -> Self {
        Self { identity, client }
    }

    pub fn identity(&self) -> &IssuerIdentity {
        &self.identity
    }

    pub fn client(&self) -> &dyn CaClient {
        self.client.as_ref()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
