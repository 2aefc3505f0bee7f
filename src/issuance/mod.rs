//! Talking to the step CA: activation, signing and the signer registry.

pub mod activator;
pub mod ca;
pub mod csr;
pub mod pipeline;
pub mod provisioner;
pub mod signer;
pub mod step;
pub mod store;

#[cfg(test)]
pub(crate) mod fake;

pub use activator::{ActivationError, IssuerActivator};
pub use ca::{CaClient, CaConnector, CaError};
pub use pipeline::{SignError, SignedCertificate, SigningInput, sign_request};
pub use signer::Signer;
pub use step::StepCaConnector;
pub use store::IssuerStore;
