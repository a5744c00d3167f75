//! End-to-end exercises of the bridge over stub agents: a signed agent, an
//! unsigned agent and a dead endpoint, discovered through an in-memory
//! candidate source and driven through the same operations the tool
//! surface exposes.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Json, Router};

use scout8::bridge::message::{JsonRpcRequest, JsonRpcResponse};
use scout8::bridge::ProtocolBridge;
use scout8::config::{Config, SigningConfig};
use scout8::discovery::{AgentPhase, DiscoveryScope, StaticCandidateSource};
use scout8::k8s::CandidateResource;
use scout8::trust::signer::CardSigner;
use scout8::trust::sources::KeySetSource;
use scout8::trust::verifier::VerificationStatus;
use scout8::Scout8Error;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn stub_agent(card: serde_json::Value) -> String {
    let app = Router::new()
        .route("/.well-known/agent.json", get(move || async move { Json(card) }))
        .route("/health", get(|| async { "ok" }))
        .route(
            "/",
            post(|Json(request): Json<JsonRpcRequest>| async move {
                let text = request.params["message"]["parts"][0]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                Json(JsonRpcResponse::result(
                    Some(serde_json::Value::String(request.id)),
                    serde_json::json!({
                        "role": "agent",
                        "parts": [{"kind": "text", "text": format!("echo: {text}")}]
                    }),
                ))
            }),
        );
    serve(app).await
}

async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn candidate(name: &str, address: &str) -> CandidateResource {
    CandidateResource {
        namespace: "agents".to_string(),
        name: name.to_string(),
        agent_class: "a2a".to_string(),
        agent_name: name.to_string(),
        card_path: "/.well-known/agent.json".to_string(),
        address: Some(address.to_string()),
    }
}

fn signer(kid: &str) -> CardSigner {
    CardSigner::from_config(&SigningConfig {
        kid: Some(kid.to_string()),
        ..SigningConfig::default()
    })
    .unwrap()
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.fetch.timeout = Duration::from_millis(1500);
    config
}

#[tokio::test]
async fn discovery_reflects_mixed_cluster_state() {
    let signer = signer("fleet-key");
    let mut signed_card = serde_json::json!({"name": "signed", "version": "1.0.0"});
    signer.sign_card(&mut signed_card).unwrap();

    let signed = stub_agent(signed_card).await;
    let unsigned = stub_agent(serde_json::json!({"name": "unsigned"})).await;
    let dead = dead_endpoint().await;

    let source = Arc::new(StaticCandidateSource {
        candidates: vec![
            candidate("signed", &signed),
            candidate("unsigned", &unsigned),
            candidate("dead", &dead),
        ],
    });

    let mut config = fast_config();
    config.policy.trusted_keys = vec![KeySetSource::Inline(
        serde_json::to_string(&signer.public_key_set()).unwrap(),
    )];
    let bridge = ProtocolBridge::new(source, config).await.unwrap();

    // Without signature gating: both live agents are Ready.
    let records = bridge
        .discover_agents(&DiscoveryScope::AllNamespaces, true, false)
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
    let by_name = |name: &str| records.iter().find(|r| r.name == name).unwrap();
    assert_eq!(by_name("signed").phase, AgentPhase::Ready);
    assert_eq!(by_name("unsigned").phase, AgentPhase::Ready);
    assert_eq!(by_name("dead").phase, AgentPhase::Unreachable);
    assert_eq!(by_name("signed").healthy, Some(true));

    // With signature gating: only the signed agent stays Ready.
    let records = bridge
        .discover_agents(&DiscoveryScope::AllNamespaces, true, true)
        .await
        .unwrap();
    let by_name = |name: &str| records.iter().find(|r| r.name == name).unwrap();
    assert_eq!(by_name("signed").phase, AgentPhase::Ready);
    assert!(by_name("signed").verification.as_ref().unwrap().is_verified());
    assert_eq!(by_name("unsigned").phase, AgentPhase::Unverified);
    assert_eq!(
        by_name("unsigned").verification,
        Some(VerificationStatus::Unsigned)
    );
    assert_eq!(by_name("dead").phase, AgentPhase::Unreachable);
}

#[tokio::test]
async fn listing_is_stateless_across_agent_restarts() {
    let card = serde_json::json!({"name": "flaky"});
    let origin = stub_agent(card).await;

    let source = Arc::new(StaticCandidateSource {
        candidates: vec![candidate("flaky", &origin)],
    });
    let bridge = ProtocolBridge::new(source.clone(), fast_config()).await.unwrap();

    let records = bridge
        .discover_agents(&DiscoveryScope::AllNamespaces, true, false)
        .await
        .unwrap();
    assert_eq!(records[0].phase, AgentPhase::Ready);

    // The same candidate pointed at a dead address recomputes honestly:
    // the earlier Ready record carried no guarantee forward.
    let dead = dead_endpoint().await;
    let source = Arc::new(StaticCandidateSource {
        candidates: vec![candidate("flaky", &dead)],
    });
    let bridge = ProtocolBridge::new(source, fast_config()).await.unwrap();
    let records = bridge
        .discover_agents(&DiscoveryScope::AllNamespaces, true, false)
        .await
        .unwrap();
    assert_eq!(records[0].phase, AgentPhase::Unreachable);
}

#[tokio::test]
async fn strict_policy_gates_messaging_end_to_end() {
    let unsigned = stub_agent(serde_json::json!({"name": "casual"})).await;

    let mut strict = fast_config();
    strict.policy.require_verified_card = true;
    let bridge = ProtocolBridge::new(
        Arc::new(StaticCandidateSource::default()),
        strict,
    )
    .await
    .unwrap();

    match bridge.send_message(&unsigned, "hello").await {
        Err(Scout8Error::PolicyViolation(reason)) => {
            assert!(reason.contains("no signatures"));
        }
        other => panic!("expected PolicyViolation, got {other:?}"),
    }

    // The permissive bridge relays and reports Unsigned as information.
    let bridge = ProtocolBridge::new(
        Arc::new(StaticCandidateSource::default()),
        fast_config(),
    )
    .await
    .unwrap();
    let report = bridge.send_message(&unsigned, "hello").await.unwrap();
    assert_eq!(report.verification, VerificationStatus::Unsigned);
    assert_eq!(report.response.text(), "echo: hello");
}

#[tokio::test]
async fn jku_resolution_verifies_remote_keys() {
    // The agent publishes its key set itself; the verifier reaches it via
    // the jku header because plain-HTTP key sources are explicitly allowed.
    let kid = "self-published";
    let generated = scout8::trust::keys::generate_ed25519(kid).unwrap();
    let jwks = serde_json::json!({"keys": [generated.public_jwk]});
    let jwks_origin = serve(Router::new().route(
        "/.well-known/jwks.json",
        get(move || async move { Json(jwks) }),
    ))
    .await;

    let signer = CardSigner::from_config(&SigningConfig {
        jwk_json: Some(generated.private_jwk.to_string()),
        jwks_url: Some(format!("{jwks_origin}/.well-known/jwks.json")),
        ..SigningConfig::default()
    })
    .unwrap();
    let mut card = serde_json::json!({"name": "self-trust"});
    signer.sign_card(&mut card).unwrap();
    let agent = stub_agent(card).await;

    let mut config = fast_config();
    config.policy.allow_http_key_source = true;
    let bridge = ProtocolBridge::new(
        Arc::new(StaticCandidateSource::default()),
        config,
    )
    .await
    .unwrap();

    let report = bridge.get_card(&agent, None).await.unwrap();
    match report.verification {
        VerificationStatus::Verified { kid: found, alg } => {
            assert_eq!(found, kid);
            assert_eq!(alg, "EdDSA");
        }
        other => panic!("expected Verified via jku, got {other:?}"),
    }
}
