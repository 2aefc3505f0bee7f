//! JWK provisioner support.
//!
//! The CA hands out the provisioner's private key as a password-protected JWE
//! (`PBES2-HS256+A128KW` key wrapping, `A256GCM` content encryption). Once
//! decrypted, the P-256 key signs the ES256 one-time tokens that authorize
//! each sign request.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use aes_kw::KekAes128;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use p256::pkcs8::EncodePrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

const KEY_ALGORITHM: &str = "PBES2-HS256+A128KW";
const CONTENT_ENCRYPTION: &str = "A256GCM";
const MAX_PBES2_ITERATIONS: u32 = 10_000_000;
const TOKEN_LIFETIME_SECS: i64 = 5 * 60;

#[derive(Error, Debug)]
pub enum ProvisionerError {
    #[error("malformed encrypted provisioner key: {0}")]
    Malformed(String),
    #[error("unsupported provisioner key: {0}")]
    Unsupported(String),
    #[error("failed to decrypt provisioner key, check the provisioner password")]
    Decrypt,
    #[error("invalid provisioner key: {0}")]
    InvalidKey(String),
    #[error("failed to sign token: {0}")]
    Token(String),
}

#[derive(Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
    p2s: String,
    p2c: u32,
}

#[derive(Deserialize)]
struct EcJwk {
    kty: String,
    crv: String,
    d: String,
}

#[derive(Serialize)]
struct TokenClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    sub: &'a str,
    sans: &'a [String],
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: String,
}

/// Decrypted JWK provisioner able to mint one-time tokens.
pub struct JwkProvisioner {
    name: String,
    kid: String,
    audience: String,
    key: EncodingKey,
}

impl JwkProvisioner {
    pub fn from_encrypted_key(
        name: &str,
        kid: &str,
        ca_url: &str,
        encrypted_key: &str,
        password: &[u8],
    ) -> Result<Self, ProvisionerError> {
        let plaintext = decrypt_jwe(encrypted_key, password)?;
        let mut jwk: EcJwk = serde_json::from_slice(&plaintext)
            .map_err(|err| ProvisionerError::InvalidKey(err.to_string()))?;
        if jwk.kty != "EC" || jwk.crv != "P-256" {
            return Err(ProvisionerError::Unsupported(format!(
                "key type {} on curve {}",
                jwk.kty, jwk.crv
            )));
        }

        let scalar = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(jwk.d.as_bytes())
                .map_err(|err| ProvisionerError::InvalidKey(err.to_string()))?,
        );
        jwk.d.zeroize();
        let secret = p256::SecretKey::from_slice(&scalar)
            .map_err(|err| ProvisionerError::InvalidKey(err.to_string()))?;
        let der = secret
            .to_pkcs8_der()
            .map_err(|err| ProvisionerError::InvalidKey(err.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            kid: kid.to_string(),
            audience: format!("{}/1.0/sign", ca_url.trim_end_matches('/')),
            key: EncodingKey::from_ec_der(der.as_bytes()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mints a token valid for five minutes. When `sans` is empty the
    /// subject itself is the only authorized name.
    pub fn token(&self, subject: &str, sans: &[String]) -> Result<String, ProvisionerError> {
        let subject_only;
        let sans = if sans.is_empty() {
            subject_only = [subject.to_string()];
            &subject_only[..]
        } else {
            sans
        };

        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            aud: &self.audience,
            iss: &self.name,
            sub: subject,
            sans,
            iat: now,
            nbf: now,
            exp: now + TOKEN_LIFETIME_SECS,
            jti: Uuid::new_v4().simple().to_string(),
        };
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());

        encode(&header, &claims, &self.key).map_err(|err| ProvisionerError::Token(err.to_string()))
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, ProvisionerError> {
    URL_SAFE_NO_PAD
        .decode(segment.as_bytes())
        .map_err(|err| ProvisionerError::Malformed(err.to_string()))
}

fn decrypt_jwe(compact: &str, password: &[u8]) -> Result<Zeroizing<Vec<u8>>, ProvisionerError> {
    let segments: Vec<&str> = compact.trim().split('.').collect();
    let [header_b64, wrapped_b64, iv_b64, ciphertext_b64, tag_b64] = segments.as_slice() else {
        return Err(ProvisionerError::Malformed(format!(
            "expected 5 JWE segments, found {}",
            segments.len()
        )));
    };

    let header: JweHeader = serde_json::from_slice(&decode_segment(header_b64)?)
        .map_err(|err| ProvisionerError::Malformed(err.to_string()))?;
    if header.alg != KEY_ALGORITHM || header.enc != CONTENT_ENCRYPTION {
        return Err(ProvisionerError::Unsupported(format!(
            "{} with {}",
            header.alg, header.enc
        )));
    }
    if header.p2c == 0 || header.p2c > MAX_PBES2_ITERATIONS {
        return Err(ProvisionerError::Malformed(format!(
            "iteration count {} out of range",
            header.p2c
        )));
    }

    // RFC 7518 4.8.1.1: salt input is the algorithm name, a zero byte, then p2s.
    let p2s = decode_segment(&header.p2s)?;
    let mut salt = Vec::with_capacity(KEY_ALGORITHM.len() + 1 + p2s.len());
    salt.extend_from_slice(KEY_ALGORITHM.as_bytes());
    salt.push(0);
    salt.extend_from_slice(&p2s);

    let mut kek = Zeroizing::new([0u8; 16]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, &salt, header.p2c, &mut *kek);

    let wrapped = decode_segment(wrapped_b64)?;
    let cek = Zeroizing::new(
        KekAes128::from(*kek)
            .unwrap_vec(&wrapped)
            .map_err(|_| ProvisionerError::Decrypt)?,
    );

    let iv = decode_segment(iv_b64)?;
    if iv.len() != 12 {
        return Err(ProvisionerError::Malformed(format!(
            "initialization vector has {} bytes",
            iv.len()
        )));
    }
    let mut sealed = decode_segment(ciphertext_b64)?;
    sealed.extend_from_slice(&decode_segment(tag_b64)?);

    let cipher = Aes256Gcm::new_from_slice(&cek)
        .map_err(|_| ProvisionerError::Malformed("content key has wrong length".into()))?;
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: header_b64.as_bytes(),
            },
        )
        .map_err(|_| ProvisionerError::Decrypt)?;
    Ok(Zeroizing::new(plaintext))
}
