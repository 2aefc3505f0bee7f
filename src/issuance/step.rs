//! reqwest client for the step certificates HTTP API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::ca::{
    CaClient, CaConnector, CaError, ClientIdentity, ConnectOptions, SignRequest, SignResponse,
    VersionInfo,
};
use super::provisioner::JwkProvisioner;

const PROVISIONER_PAGE_LIMIT: usize = 100;
const MAX_PROVISIONER_PAGES: usize = 50;

#[derive(Deserialize)]
struct RootsResponse {
    #[serde(default)]
    crts: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    #[serde(default)]
    version: String,
    #[serde(default)]
    require_client_authentication: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionersResponse {
    #[serde(default)]
    provisioners: Vec<ProvisionerEntry>,
    #[serde(default)]
    next_cursor: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionerEntry {
    #[serde(rename = "type", default)]
    type_: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    key: Option<ProvisionerKey>,
}

#[derive(Deserialize)]
struct ProvisionerKey {
    #[serde(default)]
    kid: String,
}

#[derive(Deserialize)]
struct EncryptedKeyResponse {
    key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignBody<'a> {
    csr: &'a str,
    ott: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    not_after: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponseBody {
    crt: String,
    #[serde(default)]
    ca: String,
    #[serde(default)]
    cert_chain: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Opens sessions against a step certificates instance.
pub struct StepCaConnector {
    timeout: Duration,
}

impl StepCaConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CaConnector for StepCaConnector {
    async fn connect(&self, options: &ConnectOptions<'_>) -> Result<Arc<dyn CaClient>, CaError> {
        let endpoint = Endpoint {
            base_url: options.url.trim_end_matches('/').to_string(),
            http: build_http_client(options.ca_bundle, self.timeout, None)?,
        };

        endpoint
            .find_jwk_provisioner(options.provisioner_name, options.key_id)
            .await?;
        let encrypted: EncryptedKeyResponse = endpoint
            .get_json(&format!("/provisioners/{}/encrypted-key", options.key_id))
            .await?;
        let provisioner = JwkProvisioner::from_encrypted_key(
            options.provisioner_name,
            options.key_id,
            &endpoint.base_url,
            &encrypted.key,
            options.password,
        )
        .map_err(|err| CaError::Rejected(err.to_string()))?;
        debug!(
            "[step-ca] provisioner {} ready for {}",
            provisioner.name(),
            endpoint.base_url
        );

        Ok(Arc::new(StepCaClient {
            endpoint,
            provisioner: Arc::new(provisioner),
            ca_bundle: options.ca_bundle.map(<[u8]>::to_vec),
            timeout: self.timeout,
        }))
    }
}

/// Session bound to one provisioner. Cloning the transport for a client
/// identity yields a new session; the original keeps its plain transport.
pub struct StepCaClient {
    endpoint: Endpoint,
    provisioner: Arc<JwkProvisioner>,
    ca_bundle: Option<Vec<u8>>,
    timeout: Duration,
}

/// Go duration for the `notAfter` field. A zero duration leaves the
/// lifetime to the provisioner.
fn not_after(duration: Duration) -> Option<String> {
    if duration.is_zero() {
        None
    } else if duration.subsec_nanos() == 0 {
        Some(format!("{}s", duration.as_secs()))
    } else {
        Some(format!("{}ns", duration.as_nanos()))
    }
}

#[async_trait]
impl CaClient for StepCaClient {
    async fn roots(&self) -> Result<Vec<Vec<u8>>, CaError> {
        let response: RootsResponse = self.endpoint.get_json("/roots").await?;
        response.crts.iter().map(|pem| pem_to_der(pem)).collect()
    }

    async fn version(&self) -> Result<VersionInfo, CaError> {
        let response: VersionResponse = self.endpoint.get_json("/version").await?;
        Ok(VersionInfo {
            version: response.version,
            require_client_auth: response.require_client_authentication,
        })
    }

    fn token(&self, subject: &str, sans: &[String]) -> Result<String, CaError> {
        self.provisioner
            .token(subject, sans)
            .map_err(|err| CaError::Protocol(err.to_string()))
    }

    async fn sign(&self, request: &SignRequest) -> Result<SignResponse, CaError> {
        let body = SignBody {
            csr: &request.csr_pem,
            ott: &request.token,
            not_after: request.not_after.and_then(not_after),
        };
        let response: SignResponseBody = self.endpoint.post_json("/sign", &body).await?;
        sign_response_from_body(response)
    }

    fn with_identity(&self, identity: &ClientIdentity) -> Result<Arc<dyn CaClient>, CaError> {
        let http = build_http_client(self.ca_bundle.as_deref(), self.timeout, Some(identity))?;
        Ok(Arc::new(StepCaClient {
            endpoint: Endpoint {
                base_url: self.endpoint.base_url.clone(),
                http,
            },
            provisioner: self.provisioner.clone(),
            ca_bundle: self.ca_bundle.clone(),
            timeout: self.timeout,
        }))
    }
}

struct Endpoint {
    base_url: String,
    http: Client,
}

impl Endpoint {
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CaError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await.map_err(transport_error)?;
        decode_response(response).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CaError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(response).await
    }

    /// Pages through `/provisioners` until a JWK provisioner with the given
    /// name and key id shows up.
    async fn find_jwk_provisioner(&self, name: &str, kid: &str) -> Result<(), CaError> {
        let mut cursor = String::new();
        for _ in 0..MAX_PROVISIONER_PAGES {
            let page: ProvisionersResponse = self
                .get_json(&format!(
                    "/provisioners?cursor={cursor}&limit={PROVISIONER_PAGE_LIMIT}"
                ))
                .await?;
            let found = page.provisioners.iter().any(|entry| {
                entry.type_.eq_ignore_ascii_case("jwk")
                    && entry.name == name
                    && entry.key.as_ref().is_some_and(|key| key.kid == kid)
            });
            if found {
                return Ok(());
            }
            if page.next_cursor.is_empty() {
                break;
            }
            cursor = page.next_cursor;
        }
        Err(CaError::Rejected(format!(
            "JWK provisioner {name} with kid {kid} not found"
        )))
    }
}

fn build_http_client(
    ca_bundle: Option<&[u8]>,
    timeout: Duration,
    identity: Option<&ClientIdentity>,
) -> Result<Client, CaError> {
    let mut builder = Client::builder().timeout(timeout);
    if let Some(bundle) = ca_bundle {
        let roots = reqwest::Certificate::from_pem_bundle(bundle)
            .map_err(|err| CaError::Protocol(format!("invalid CA bundle: {err}")))?;
        if roots.is_empty() {
            return Err(CaError::Protocol(
                "CA bundle contains no certificates".into(),
            ));
        }
        builder = builder.tls_built_in_root_certs(false);
        for root in roots {
            builder = builder.add_root_certificate(root);
        }
    }
    if let Some(identity) = identity {
        let mut pem = identity.certificate_chain_pem.as_bytes().to_vec();
        pem.extend_from_slice(identity.private_key_pem.as_bytes());
        let client_identity = reqwest::Identity::from_pem(&pem)
            .map_err(|err| CaError::Protocol(format!("invalid client identity: {err}")));
        pem.fill(0);
        builder = builder.identity(client_identity?);
    }
    builder
        .build()
        .map_err(|err| CaError::Protocol(format!("failed to build HTTP client: {err}")))
}

fn transport_error(err: reqwest::Error) -> CaError {
    warn!("[step-ca] request failed: {err}");
    CaError::Unavailable(err.to_string())
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, CaError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| CaError::Protocol(format!("failed to decode response: {err}")));
    }
    let body = response.text().await.ok();
    Err(status_error(status, body))
}

/// Maps a non-success HTTP status onto the CA error taxonomy.
fn status_error(status: StatusCode, body: Option<String>) -> CaError {
    let message = body
        .as_deref()
        .and_then(|raw| serde_json::from_str::<ErrorBody>(raw).ok())
        .map(|parsed| parsed.message)
        .or(body.filter(|raw| !raw.trim().is_empty()))
        .unwrap_or_else(|| status.to_string());

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return CaError::Unavailable(message);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return CaError::Rejected(format!("authentication failed: {message}"));
    }
    CaError::Rejected(message)
}

fn pem_to_der(raw: &str) -> Result<Vec<u8>, CaError> {
    pem::parse(raw)
        .map(|block| block.into_contents())
        .map_err(|err| CaError::Protocol(format!("invalid certificate PEM: {err}")))
}

/// `certChain` starts with the leaf; older servers only send `crt` and `ca`.
fn sign_response_from_body(body: SignResponseBody) -> Result<SignResponse, CaError> {
    let leaf = pem_to_der(&body.crt)?;
    let chain = if body.cert_chain.len() > 1 {
        body.cert_chain[1..]
            .iter()
            .map(|pem| pem_to_der(pem))
            .collect::<Result<Vec<_>, _>>()?
    } else if !body.ca.trim().is_empty() {
        vec![pem_to_der(&body.ca)?]
    } else {
        Vec::new()
    };
    Ok(SignResponse { leaf, chain })
}
