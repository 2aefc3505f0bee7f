use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use step_issuer::issuance::ca::{
    CaClient, CaConnector, CaError, ClientIdentity, ConnectOptions, SignRequest, SignResponse,
    VersionInfo,
};

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

struct State {
    label: String,
    root: Vec<u8>,
    leaf: Vec<u8>,
    require_client_auth: bool,
    sign_calls: AtomicUsize,
    identity_installs: AtomicUsize,
    token_subjects: Mutex<Vec<String>>,
}

/// Self-contained CA: a root that signed one fixed leaf.
#[derive(Clone)]
pub struct TestCa {
    state: Arc<State>,
}

impl TestCa {
    pub fn new(label: &str, require_client_auth: bool) -> Self {
        let root_key = KeyPair::generate().expect("generate key");
        let mut root_params = CertificateParams::new(Vec::<String>::new()).expect("root params");
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        root_params.distinguished_name = DistinguishedName::new();
        root_params
            .distinguished_name
            .push(DnType::CommonName, format!("{label} root"));
        let root = root_params.self_signed(&root_key).expect("self sign root");

        let leaf_key = KeyPair::generate().expect("generate key");
        let leaf = CertificateParams::new(vec!["web.example.com".to_string()])
            .expect("leaf params")
            .signed_by(&leaf_key, &root, &root_key)
            .expect("sign leaf");

        Self {
            state: Arc::new(State {
                label: label.to_string(),
                root: root.der().to_vec(),
                leaf: leaf.der().to_vec(),
                require_client_auth,
                sign_calls: AtomicUsize::new(0),
                identity_installs: AtomicUsize::new(0),
                token_subjects: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn sign_calls(&self) -> usize {
        self.state.sign_calls.load(Ordering::SeqCst)
    }

    pub fn identity_installs(&self) -> usize {
        self.state.identity_installs.load(Ordering::SeqCst)
    }

    pub fn token_subjects(&self) -> Vec<String> {
        self.state.token_subjects.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CaClient for TestCa {
    async fn roots(&self) -> Result<Vec<Vec<u8>>, CaError> {
        Ok(vec![self.state.root.clone()])
    }

    async fn version(&self) -> Result<VersionInfo, CaError> {
        Ok(VersionInfo {
            version: self.state.label.clone(),
            require_client_auth: self.state.require_client_auth,
        })
    }

    fn token(&self, subject: &str, _sans: &[String]) -> Result<String, CaError> {
        self.state
            .token_subjects
            .lock()
            .expect("lock")
            .push(subject.to_string());
        Ok(format!("ott-{subject}"))
    }

    async fn sign(&self, _request: &SignRequest) -> Result<SignResponse, CaError> {
        self.state.sign_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SignResponse {
            leaf: self.state.leaf.clone(),
            chain: Vec::new(),
        })
    }

    fn with_identity(&self, _identity: &ClientIdentity) -> Result<Arc<dyn CaClient>, CaError> {
        self.state.identity_installs.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

pub struct TestConnector {
    pub ca: TestCa,
}

#[async_trait]
impl CaConnector for TestConnector {
    async fn connect(&self, options: &ConnectOptions<'_>) -> Result<Arc<dyn CaClient>, CaError> {
        if options.password != b"step-password" {
            return Err(CaError::Rejected("failed to decrypt provisioner key".into()));
        }
        Ok(Arc::new(self.ca.clone()))
    }
}
