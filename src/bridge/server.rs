//! HTTP tool surface: the bridge operations as a JSON-RPC endpoint, plus
//! key-set publishing and the deployer-facing merge path.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bridge::message::JsonRpcResponse;
use crate::bridge::ProtocolBridge;
use crate::discovery::DiscoveryScope;
use crate::trust::keys::KeySet;
use crate::trust::store::RejectedKey;
use crate::{Result, Scout8Error};

const RPC_INVALID_PARAMS: i64 = -32602;
const RPC_METHOD_NOT_FOUND: i64 = -32601;
const RPC_OPERATION_FAILED: i64 = -32000;

#[derive(Clone)]
pub struct AppState {
    bridge: Arc<ProtocolBridge>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScopeParams {
    namespace: Option<String>,
    all_namespaces: bool,
}

impl ScopeParams {
    fn scope(&self) -> Result<DiscoveryScope> {
        match (&self.namespace, self.all_namespaces) {
            (_, true) => Ok(DiscoveryScope::AllNamespaces),
            (Some(ns), false) => Ok(DiscoveryScope::Namespace(ns.clone())),
            (None, false) => Err(Scout8Error::ConfigError(
                "provide namespace or set allNamespaces".to_string(),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DiscoverParams {
    #[serde(flatten)]
    scope: ScopeParams,
    verify_endpoints: bool,
    require_signature: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardParams {
    url: String,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendParams {
    url: String,
    message: String,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct MergeReport {
    keys: usize,
    rejected: Vec<RejectedKey>,
}

pub fn router(bridge: Arc<ProtocolBridge>) -> Router {
    Router::new()
        .route("/rpc", post(rpc))
        .route("/.well-known/jwks.json", get(jwks))
        .route("/keys/merge", post(merge_keys))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(AppState { bridge })
}

/// Bind and serve the tool surface until the process exits.
pub async fn serve(addr: SocketAddr, bridge: Arc<ProtocolBridge>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Serving bridge tool surface");
    axum::serve(listener, router(bridge)).await?;
    Ok(())
}

async fn rpc(
    State(state): State<AppState>,
    Json(request): Json<crate::bridge::message::JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let id = Some(serde_json::Value::String(request.id.clone()));
    let outcome = dispatch(&state, &request.method, request.params).await;
    Json(match outcome {
        Ok(result) => JsonRpcResponse::result(id, result),
        Err(RpcFailure { code, message }) => JsonRpcResponse::error(id, code, message),
    })
}

struct RpcFailure {
    code: i64,
    message: String,
}

impl From<Scout8Error> for RpcFailure {
    fn from(error: Scout8Error) -> Self {
        Self { code: RPC_OPERATION_FAILED, message: error.to_string() }
    }
}

fn params<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> std::result::Result<T, RpcFailure> {
    serde_json::from_value(value)
        .map_err(|e| RpcFailure { code: RPC_INVALID_PARAMS, message: e.to_string() })
}

async fn dispatch(
    state: &AppState,
    method: &str,
    raw_params: serde_json::Value,
) -> std::result::Result<serde_json::Value, RpcFailure> {
    let bridge = &state.bridge;
    let invalid = |e: Scout8Error| RpcFailure {
        code: RPC_INVALID_PARAMS,
        message: e.to_string(),
    };

    match method {
        "list_agents" => {
            let p: ScopeParams = params(raw_params)?;
            let records = bridge.list_agents(&p.scope().map_err(invalid)?).await?;
            Ok(serde_json::to_value(records).expect("records serialize"))
        }
        "discover_agents" => {
            let p: DiscoverParams = params(raw_params)?;
            let records = bridge
                .discover_agents(
                    &p.scope.scope().map_err(invalid)?,
                    p.verify_endpoints,
                    p.require_signature,
                )
                .await?;
            Ok(serde_json::to_value(records).expect("records serialize"))
        }
        "get_card" => {
            let p: CardParams = params(raw_params)?;
            let report = bridge.get_card(&p.url, p.path.as_deref()).await?;
            Ok(serde_json::to_value(report).expect("report serializes"))
        }
        "send_message" => {
            let p: SendParams = params(raw_params)?;
            if p.stream {
                let report = bridge.send_message_streaming(&p.url, &p.message).await?;
                Ok(serde_json::to_value(report).expect("report serializes"))
            } else {
                let report = bridge.send_message(&p.url, &p.message).await?;
                Ok(serde_json::to_value(report).expect("report serializes"))
            }
        }
        other => Err(RpcFailure {
            code: RPC_METHOD_NOT_FOUND,
            message: format!("unknown method: {other}"),
        }),
    }
}

/// Serve the trust store snapshot as an RFC 7517 key-set document.
async fn jwks(State(state): State<AppState>) -> Json<KeySet> {
    Json(state.bridge.trust_store().get())
}

/// Merge a deployer-pushed key set into the shared store.
async fn merge_keys(
    State(state): State<AppState>,
    Json(incoming): Json<KeySet>,
) -> Json<MergeReport> {
    let (merged, rejected) = state.bridge.trust_store().merge(incoming);
    Json(MergeReport { keys: merged.len(), rejected })
}
