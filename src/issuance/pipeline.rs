//! Turns a certificate request into a signed chain.

use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

use super::ca::{CaError, SignRequest};
use super::csr::{decode_csr, derive_subject, encode_pem_blocks};
use super::signer::Signer;

const CERTIFICATE_PEM_TAG: &str = "CERTIFICATE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignError {
    /// The CA could not be reached; the request stays pending.
    #[error("{0}")]
    Transient(String),
    /// Malformed request or refused by the CA; final.
    #[error("{0}")]
    Rejected(String),
    #[error("signing CA certificates is not supported")]
    Unsupported,
}

impl SignError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SignError::Transient(_))
    }

    pub fn reason(&self) -> &'static str {
        crate::api::certificate_request::REASON_FAILED
    }
}

/// PEM output ready to be written to the request status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificate {
    /// Leaf followed by the intermediates.
    pub certificate_chain: Vec<u8>,
    /// Trust roots.
    pub ca: Vec<u8>,
}

pub struct SigningInput<'a> {
    pub csr: &'a [u8],
    pub duration: Option<Duration>,
    pub is_ca: bool,
}

pub async fn sign_request(
    signer: &Signer,
    input: SigningInput<'_>,
) -> Result<SignedCertificate, SignError> {
    if input.is_ca {
        return Err(SignError::Unsupported);
    }
    let client = signer.client();

    // A malformed request is final whether or not the CA is reachable.
    let csr = decode_csr(input.csr).map_err(|err| SignError::Rejected(err.to_string()))?;

    let roots = client
        .roots()
        .await
        .map_err(|err| SignError::Transient(format!("failed to fetch CA roots: {err}")))?;
    let ca = encode_pem_blocks(CERTIFICATE_PEM_TAG, &roots);

    let subject = derive_subject(&csr.common_name, &csr.sans);
    debug!(
        "[signer] {}: subject {subject}, {} SAN(s)",
        signer.identity(),
        csr.sans.len()
    );

    let token = client.token(&subject, &csr.sans).map_err(|err| {
        let message = format!("failed to create sign token: {err}");
        match err {
            CaError::Unavailable(_) => SignError::Transient(message),
            _ => SignError::Rejected(message),
        }
    })?;

    let request = SignRequest {
        csr_pem: csr.pem(),
        token,
        not_after: input.duration,
    };
    let response = client.sign(&request).await.map_err(|err| match err {
        CaError::Unavailable(_) => SignError::Transient(err.to_string()),
        other => SignError::Rejected(other.to_string()),
    })?;

    let mut chain = Vec::with_capacity(response.chain.len() + 1);
    chain.push(response.leaf);
    chain.extend(response.chain);
    info!(
        "[signer] {} signed certificate for {subject} ({} block(s))",
        signer.identity(),
        chain.len()
    );

    Ok(SignedCertificate {
        certificate_chain: encode_pem_blocks(CERTIFICATE_PEM_TAG, &chain).into_bytes(),
        ca: ca.into_bytes(),
    })
}
