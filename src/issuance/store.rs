//! Registry of activated signers shared by all reconcilers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use crate::api::issuer::IssuerIdentity;

use super::signer::Signer;

#[derive(Clone, Default)]
pub struct IssuerStore {
    inner: Arc<RwLock<HashMap<IssuerIdentity, Arc<Signer>>>>,
}

impl IssuerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `signer`, replacing any previous entry for the same issuer.
    pub fn put(&self, identity: IssuerIdentity, signer: Signer) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = map.insert(identity.clone(), Arc::new(signer)).is_some();
        debug!("[store] published signer for {identity} (replaced: {replaced})");
    }

    pub fn get(&self, identity: &IssuerIdentity) -> Option<Arc<Signer>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Drops every entry.
    pub fn reset(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
