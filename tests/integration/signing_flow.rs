use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::ByteString;
use step_issuer::api::certificate_request::CertificateRequest;
use step_issuer::api::condition::{
    CONDITION_READY, ConditionStatus, has_condition, set_ready_condition,
};
use step_issuer::api::issuer::{IssuerIdentity, IssuerResource, StepClusterIssuer, StepIssuer};
use step_issuer::controllers::certificate_request::{Outcome, RequestDispatcher, status_update};
use step_issuer::controllers::issuer::{REASON_VERIFIED, ready_message};
use step_issuer::controllers::lookup::StaticIssuerLookup;
use step_issuer::issuance::{IssuerActivator, IssuerStore, Signer};
use step_issuer::secrets::StaticSecrets;

use crate::support::{TestCa, TestConnector, csr_pem};

fn step_issuer() -> StepIssuer {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "certmanager.step.sm/v1beta1",
        "kind": "StepIssuer",
        "metadata": { "name": "step", "namespace": "apps" },
        "spec": {
            "url": "https://ca.internal:9000",
            "provisioner": {
                "name": "admin@example.com",
                "kid": "Ykj2GPnBmbJNY3j1Pfjgo7oLa0sqFqANNE1GkCdOBJY",
                "passwordRef": { "name": "step-provisioner", "key": "password" }
            }
        }
    }))
    .expect("deserialize issuer")
}

fn certificate_request(csr: &str) -> CertificateRequest {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "cert-manager.io/v1",
        "kind": "CertificateRequest",
        "metadata": { "name": "web-1", "namespace": "apps" },
        "spec": {
            "request": ByteString(csr.as_bytes().to_vec()),
            "duration": "2160h0m0s",
            "issuerRef": { "name": "step", "kind": "StepIssuer", "group": "certmanager.step.sm" }
        },
        "status": {
            "conditions": [{ "type": "Approved", "status": "True", "reason": "cert-manager.io" }]
        }
    }))
    .expect("deserialize certificate request")
}

fn activator(ca: &TestCa) -> IssuerActivator {
    IssuerActivator::new(
        Arc::new(TestConnector { ca: ca.clone() }),
        Arc::new(StaticSecrets::new().with_secret(
            "apps",
            "step-provisioner",
            "password",
            b"step-password",
        )),
    )
}

#[tokio::test]
async fn issuer_activation_then_request_issuance() {
    let ca = TestCa::new("v0.27.0", false);
    let store = IssuerStore::new();

    let issuer = step_issuer();
    let identity = issuer.identity();
    let signer = activator(&ca)
        .activate(&identity, &issuer.issuer_config("default"))
        .await
        .expect("activate issuer");
    store.put(identity.clone(), signer);
    assert_eq!(ca.identity_installs(), 0);

    let issuer_conditions = set_ready_condition(
        issuer.conditions(),
        ConditionStatus::True,
        REASON_VERIFIED,
        &ready_message(StepIssuer::kind_name()),
        Utc::now(),
    )
    .conditions;
    let ready = has_condition(&issuer_conditions, CONDITION_READY, ConditionStatus::True);
    assert!(ready);
    assert_eq!(
        issuer_conditions[0].message,
        "StepIssuer verified and ready to sign certificates"
    );

    let lookup = StaticIssuerLookup::namespaced().with_issuer(identity, ready);
    let dispatcher = RequestDispatcher::new(store, true);
    let request = certificate_request(&csr_pem("", &["127.0.0.1", "api.example.com"]));

    let outcome = dispatcher.dispatch(&request, &lookup).await;
    assert!(matches!(outcome, Outcome::Issued(_)), "{outcome:?}");
    assert_eq!(ca.token_subjects(), vec!["api.example.com".to_string()]);

    let update = status_update(request.status.as_ref(), &outcome, Utc::now())
        .expect("issued status is written");
    assert_eq!(update.ready, ConditionStatus::True);
    assert_eq!(update.reason, "Issued");
    let certificate = update.status.certificate.clone().expect("certificate set");
    let ca_bundle = update.status.ca.clone().expect("ca set");
    assert!(!certificate.0.is_empty());
    assert!(!ca_bundle.0.is_empty());
    assert!(has_condition(
        &update.status.conditions,
        "Approved",
        ConditionStatus::True
    ));

    let mut issued = request.clone();
    issued.status = Some(update.status);
    for _ in 0..3 {
        let again = dispatcher.dispatch(&issued, &lookup).await;
        assert_eq!(again, Outcome::AlreadyIssued);
        assert_eq!(status_update(issued.status.as_ref(), &again, Utc::now()), None);
    }
    assert_eq!(ca.sign_calls(), 1);
}

#[tokio::test]
async fn ca_flagged_requests_never_sign() {
    let ca = TestCa::new("v0.27.0", false);
    let store = IssuerStore::new();
    let identity = IssuerIdentity::namespaced("apps", "step");
    store.put(identity.clone(), Signer::new(identity.clone(), Arc::new(ca.clone())));

    let mut request = certificate_request(&csr_pem("intermediate", &[]));
    request.spec.is_ca = true;
    let lookup = StaticIssuerLookup::namespaced().with_issuer(identity, true);

    let outcome = RequestDispatcher::new(store, true)
        .dispatch(&request, &lookup)
        .await;
    assert_eq!(outcome, Outcome::Skipped);
    assert_eq!(ca.sign_calls(), 0);
}

#[tokio::test]
async fn mutual_tls_bootstrap_uses_issuer_identity_name() {
    let ca = TestCa::new("v0.27.0", true);
    let issuer = step_issuer();

    activator(&ca)
        .activate(&issuer.identity(), &issuer.issuer_config("default"))
        .await
        .expect("activate with bootstrap");

    assert_eq!(ca.token_subjects(), vec!["step.apps".to_string()]);
    assert_eq!(ca.sign_calls(), 1);
    assert_eq!(ca.identity_installs(), 1);
}

#[tokio::test]
async fn cluster_issuer_reads_password_from_fallback_namespace() {
    let ca = TestCa::new("v0.27.0", false);
    let issuer: StepClusterIssuer = serde_json::from_value(serde_json::json!({
        "apiVersion": "certmanager.step.sm/v1beta1",
        "kind": "StepClusterIssuer",
        "metadata": { "name": "step" },
        "spec": {
            "url": "https://ca.internal:9000",
            "provisioner": {
                "name": "admin@example.com",
                "kid": "kid",
                "passwordRef": { "name": "step-provisioner", "key": "password" }
            }
        }
    }))
    .expect("deserialize cluster issuer");

    let err = activator(&ca)
        .activate(&issuer.identity(), &issuer.issuer_config("default"))
        .await
        .expect_err("secret lives in apps, not default");
    assert_eq!(err.reason(), "NotFound");

    activator(&ca)
        .activate(&issuer.identity(), &issuer.issuer_config("apps"))
        .await
        .expect("activate from configured namespace");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_puts_leave_exactly_one_signer() {
    let store = IssuerStore::new();
    let identity = IssuerIdentity::cluster("step");

    let mut handles = Vec::new();
    for label in ["first", "second"] {
        let store = store.clone();
        let identity = identity.clone();
        handles.push(tokio::spawn(async move {
            let ca = TestCa::new(label, false);
            store.put(identity.clone(), Signer::new(identity, Arc::new(ca)));
        }));
    }
    for handle in handles {
        handle.await.expect("put task");
    }

    let signer = store.get(&identity).expect("signer present");
    let version = signer.client().version().await.expect("version");
    assert!(
        version.version == "first" || version.version == "second",
        "unexpected signer {}",
        version.version
    );
    assert_eq!(store.len(), 1);
}
