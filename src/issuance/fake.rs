//! In-memory CA used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
};

use super::ca::{
    CaClient, CaConnector, CaError, ClientIdentity, ConnectOptions, SignRequest, SignResponse,
    VersionInfo,
};
use super::csr::encode_pem_blocks;

/// Builds a PEM request; an empty `common_name` leaves the subject empty.
pub fn csr_pem(common_name: &str, sans: &[&str]) -> String {
    let key = KeyPair::generate().expect("generate key");
    let mut params =
        CertificateParams::new(sans.iter().map(|san| san.to_string()).collect::<Vec<_>>())
            .expect("csr params");
    params.distinguished_name = DistinguishedName::new();
    if !common_name.is_empty() {
        params.distinguished_name.push(DnType::CommonName, common_name);
    }
    params
        .serialize_request(&key)
        .expect("serialize csr")
        .pem()
        .expect("csr pem")
}

fn ca_certificate(
    name: &str,
    issuer: Option<(&Certificate, &KeyPair)>,
) -> (Certificate, KeyPair) {
    let key = KeyPair::generate().expect("generate key");
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, name);
    let cert = match issuer {
        Some((issuer_cert, issuer_key)) => params
            .signed_by(&key, issuer_cert, issuer_key)
            .expect("sign ca"),
        None => params.self_signed(&key).expect("self sign ca"),
    };
    (cert, key)
}

#[derive(Default)]
struct FakeState {
    root: Vec<u8>,
    intermediate: Vec<u8>,
    leaf: Vec<u8>,
    require_client_auth: bool,
    roots_calls: AtomicUsize,
    sign_calls: AtomicUsize,
    version_calls: AtomicUsize,
    identity_installs: AtomicUsize,
    sign_failure: Mutex<Option<CaError>>,
    roots_failure: Mutex<Option<CaError>>,
    token_failure: Mutex<Option<CaError>>,
    version_failure: Mutex<Option<CaError>>,
    sign_requests: Mutex<Vec<(SignRequest, Option<String>)>>,
    token_subjects: Mutex<Vec<String>>,
}

/// Returns a fixed leaf and intermediate for every sign call and counts
/// calls.
#[derive(Clone)]
pub struct FakeCa {
    state: Arc<FakeState>,
    identity: Option<String>,
}

impl FakeCa {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn requiring_client_auth() -> Self {
        Self::build(true)
    }

    fn build(require_client_auth: bool) -> Self {
        let (root, root_key) = ca_certificate("Fake Root CA", None);
        let (intermediate, intermediate_key) =
            ca_certificate("Fake Intermediate CA", Some((&root, &root_key)));
        let leaf_key = KeyPair::generate().expect("generate key");
        let leaf = CertificateParams::new(vec!["web.example.com".to_string()])
            .expect("leaf params")
            .signed_by(&leaf_key, &intermediate, &intermediate_key)
            .expect("sign leaf");

        Self {
            state: Arc::new(FakeState {
                root: root.der().to_vec(),
                intermediate: intermediate.der().to_vec(),
                leaf: leaf.der().to_vec(),
                require_client_auth,
                ..FakeState::default()
            }),
            identity: None,
        }
    }

    pub fn leaf_pem(&self) -> String {
        encode_pem_blocks("CERTIFICATE", std::slice::from_ref(&self.state.leaf))
    }

    pub fn root_pem(&self) -> String {
        encode_pem_blocks("CERTIFICATE", std::slice::from_ref(&self.state.root))
    }

    pub fn fail_sign_with(&self, err: CaError) {
        *self.state.sign_failure.lock().expect("lock") = Some(err);
    }

    pub fn fail_roots_with(&self, err: CaError) {
        *self.state.roots_failure.lock().expect("lock") = Some(err);
    }

    pub fn fail_token_with(&self, err: CaError) {
        *self.state.token_failure.lock().expect("lock") = Some(err);
    }

    pub fn fail_version_with(&self, err: CaError) {
        *self.state.version_failure.lock().expect("lock") = Some(err);
    }

    pub fn sign_calls(&self) -> usize {
        self.state.sign_calls.load(Ordering::SeqCst)
    }

    pub fn roots_calls(&self) -> usize {
        self.state.roots_calls.load(Ordering::SeqCst)
    }

    pub fn version_calls(&self) -> usize {
        self.state.version_calls.load(Ordering::SeqCst)
    }

    pub fn identity_installs(&self) -> usize {
        self.state.identity_installs.load(Ordering::SeqCst)
    }

    pub fn last_sign_request(&self) -> Option<SignRequest> {
        self.state
            .sign_requests
            .lock()
            .expect("lock")
            .last()
            .map(|(request, _)| request.clone())
    }

    /// Client certificate chain presented on the most recent sign call.
    pub fn last_sign_identity(&self) -> Option<String> {
        self.state
            .sign_requests
            .lock()
            .expect("lock")
            .last()
            .and_then(|(_, identity)| identity.clone())
    }

    pub fn token_subjects(&self) -> Vec<String> {
        self.state.token_subjects.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CaClient for FakeCa {
    async fn roots(&self) -> Result<Vec<Vec<u8>>, CaError> {
        self.state.roots_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.roots_failure.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(vec![self.state.root.clone()])
    }

    async fn version(&self) -> Result<VersionInfo, CaError> {
        self.state.version_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.version_failure.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(VersionInfo {
            version: "0.27.0".into(),
            require_client_auth: self.state.require_client_auth,
        })
    }

    fn token(&self, subject: &str, _sans: &[String]) -> Result<String, CaError> {
        self.state
            .token_subjects
            .lock()
            .expect("lock")
            .push(subject.to_string());
        if let Some(err) = self.state.token_failure.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(format!("token-for-{subject}"))
    }

    async fn sign(&self, request: &SignRequest) -> Result<SignResponse, CaError> {
        self.state.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .sign_requests
            .lock()
            .expect("lock")
            .push((request.clone(), self.identity.clone()));
        if let Some(err) = self.state.sign_failure.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(SignResponse {
            leaf: self.state.leaf.clone(),
            chain: vec![self.state.intermediate.clone()],
        })
    }

    fn with_identity(&self, identity: &ClientIdentity) -> Result<Arc<dyn CaClient>, CaError> {
        self.state.identity_installs.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeCa {
            state: self.state.clone(),
            identity: Some(identity.certificate_chain_pem.clone()),
        }))
    }
}

/// Hands out a shared [`FakeCa`] and remembers the password it was given.
pub struct FakeConnector {
    pub ca: FakeCa,
    failure: Mutex<Option<CaError>>,
    passwords: Mutex<Vec<Vec<u8>>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(ca: FakeCa) -> Self {
        Self {
            ca,
            failure: Mutex::new(None),
            passwords: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn fail_with(&self, err: CaError) {
        *self.failure.lock().expect("lock") = Some(err);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn passwords(&self) -> Vec<Vec<u8>> {
        self.passwords.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CaConnector for FakeConnector {
    async fn connect(&self, options: &ConnectOptions<'_>) -> Result<Arc<dyn CaClient>, CaError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.passwords
            .lock()
            .expect("lock")
            .push(options.password.to_vec());
        if let Some(err) = self.failure.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(Arc::new(self.ca.clone()))
    }
}
