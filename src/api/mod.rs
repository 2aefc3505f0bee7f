//! Kubernetes resource types owned or consumed by the controller.

pub mod certificate_request;
pub mod condition;
pub mod issuer;
