//! PKCS#10 request decoding and authorization subject selection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use pem::{EncodeConfig, LineEnding, Pem};
use thiserror::Error;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

const CSR_PEM_TAG: &str = "CERTIFICATE REQUEST";

/// Subject used when a request carries neither a common name nor any SAN.
pub const FALLBACK_SUBJECT: &str = "step-issuer-certificate";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsrError {
    #[error("unexpected CSR PEM on sign request")]
    Pem,
    #[error("failed to parse CSR: {0}")]
    Parse(String),
    #[error("invalid CSR signature: {0}")]
    Signature(String),
}

/// A verified certificate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCsr {
    pub der: Vec<u8>,
    pub common_name: String,
    /// DNS names, then emails, then IP addresses, then URIs.
    pub sans: Vec<String>,
}

impl ParsedCsr {
    pub fn pem(&self) -> String {
        encode_pem_blocks(CSR_PEM_TAG, std::slice::from_ref(&self.der))
    }
}

/// Decodes a PEM request. The input must hold exactly one `CERTIFICATE
/// REQUEST` block with no trailing bytes after its END line, and the request
/// must carry a valid self-signature.
pub fn decode_csr(input: &[u8]) -> Result<ParsedCsr, CsrError> {
    let text = std::str::from_utf8(input).map_err(|_| CsrError::Pem)?;
    let blocks = pem::parse_many(text).map_err(|_| CsrError::Pem)?;
    let [block] = blocks.as_slice() else {
        return Err(CsrError::Pem);
    };
    if block.tag() != CSR_PEM_TAG {
        return Err(CsrError::Pem);
    }
    let end_marker = format!("-----END {CSR_PEM_TAG}-----");
    let end = text
        .rfind(&end_marker)
        .map(|index| index + end_marker.len())
        .ok_or(CsrError::Pem)?;
    // Only the line terminator of the END line may follow.
    if !matches!(&text[end..], "" | "\n" | "\r\n") {
        return Err(CsrError::Pem);
    }

    let der = block.contents();
    let (rest, csr) = X509CertificationRequest::from_der(der)
        .map_err(|err| CsrError::Parse(err.to_string()))?;
    if !rest.is_empty() {
        return Err(CsrError::Parse("trailing data after request".into()));
    }
    csr.verify_signature()
        .map_err(|err| CsrError::Signature(err.to_string()))?;

    let common_name = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string();

    Ok(ParsedCsr {
        der: der.to_vec(),
        common_name,
        sans: collect_sans(&csr),
    })
}

fn collect_sans(csr: &X509CertificationRequest<'_>) -> Vec<String> {
    let mut dns = Vec::new();
    let mut emails = Vec::new();
    let mut ips = Vec::new();
    let mut uris = Vec::new();

    let Some(extensions) = csr.requested_extensions() else {
        return Vec::new();
    };
    for extension in extensions {
        let ParsedExtension::SubjectAlternativeName(san) = extension else {
            continue;
        };
        for name in &san.general_names {
            match name {
                GeneralName::DNSName(value) => dns.push(value.to_string()),
                GeneralName::RFC822Name(value) => emails.push(value.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        ips.push(ip.to_string());
                    }
                }
                GeneralName::URI(value) => uris.push(value.to_string()),
                _ => {}
            }
        }
    }

    dns.into_iter()
        .chain(emails)
        .chain(ips)
        .chain(uris)
        .collect()
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Picks the subject the authorization token is scoped to.
pub fn derive_subject(common_name: &str, sans: &[String]) -> String {
    if !common_name.is_empty() {
        return common_name.to_string();
    }
    sans.iter()
        .find(|san| san.as_str() != "127.0.0.1" && san.as_str() != "localhost")
        .or_else(|| sans.first())
        .cloned()
        .unwrap_or_else(|| FALLBACK_SUBJECT.to_string())
}

/// Concatenates DER blobs into LF-terminated PEM blocks, preserving order.
pub fn encode_pem_blocks(tag: &str, blocks: &[Vec<u8>]) -> String {
    let pems: Vec<Pem> = blocks
        .iter()
        .map(|der| Pem::new(tag, der.clone()))
        .collect();
    pem::encode_many_config(&pems, EncodeConfig::new().set_line_ending(LineEnding::LF))
}
