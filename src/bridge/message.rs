//! JSON-RPC messaging client for agent endpoints.

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{Result, Scout8Error};

const METHOD_SEND: &str = "message/send";
const METHOD_STREAM: &str = "message/stream";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Uuid::new_v4().to_string(),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn result(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    pub fn error(id: Option<serde_json::Value>, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
        }
    }
}

/// One role-tagged content part of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePart {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessagePart {
    pub fn text(text: &str) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.to_string()),
            extra: serde_json::Map::new(),
        }
    }
}

/// An evidence reference attached to an agent reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// A message exchanged with an agent: role-tagged part list plus optional
/// citations. Unknown fields are preserved verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentMessage {
    pub fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![MessagePart::text(text)],
            message_id: Some(Uuid::new_v4().simple().to_string()),
            citations: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Concatenated text parts, for human-facing rendering.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct MessageClient {
    http: reqwest::Client,
}

impl MessageClient {
    pub fn new(timeout: Duration, allow_insecure_tls: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(allow_insecure_tls)
            .build()
            .map_err(|e| Scout8Error::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Relay one message and return the agent's structured reply.
    pub async fn send(&self, url: &str, text: &str) -> Result<AgentMessage> {
        let request = JsonRpcRequest::new(
            METHOD_SEND,
            serde_json::json!({ "message": AgentMessage::user(text) }),
        );
        debug!(url = %url, id = %request.id, "Relaying message to agent");

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Scout8Error::Unreachable { url: url.to_string(), reason: e.to_string() })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Scout8Error::Unreachable {
                url: url.to_string(),
                reason: format!("status {status}"),
            });
        }

        let body: JsonRpcResponse = response.json().await.map_err(|e| Scout8Error::Malformed {
            url: url.to_string(),
            reason: format!("not a JSON-RPC response: {e}"),
        })?;

        if let Some(error) = body.error {
            return Err(Scout8Error::AgentError { code: error.code, message: error.message });
        }
        let result = body.result.ok_or_else(|| Scout8Error::Malformed {
            url: url.to_string(),
            reason: "JSON-RPC response carries neither result nor error".to_string(),
        })?;
        serde_json::from_value(result).map_err(|e| Scout8Error::Malformed {
            url: url.to_string(),
            reason: format!("result is not a message: {e}"),
        })
    }

    /// Relay one message over the streamed variant, collecting the chunk
    /// sequence. Accepts newline-delimited JSON, with or without SSE
    /// `data:` framing.
    pub async fn send_streaming(&self, url: &str, text: &str) -> Result<Vec<serde_json::Value>> {
        let request = JsonRpcRequest::new(
            METHOD_STREAM,
            serde_json::json!({ "message": AgentMessage::user(text) }),
        );

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Scout8Error::Unreachable { url: url.to_string(), reason: e.to_string() })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Scout8Error::Unreachable {
                url: url.to_string(),
                reason: format!("status {status}"),
            });
        }

        let mut chunks = Vec::new();
        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(piece) = stream.next().await {
            let piece = piece.map_err(|e| Scout8Error::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            buffer.extend_from_slice(&piece);
            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                push_chunk(&mut chunks, &line, url)?;
            }
        }
        push_chunk(&mut chunks, &buffer, url)?;
        Ok(chunks)
    }
}

fn push_chunk(chunks: &mut Vec<serde_json::Value>, line: &[u8], url: &str) -> Result<()> {
    let line = std::str::from_utf8(line).unwrap_or("").trim();
    let line = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if line.is_empty() {
        return Ok(());
    }
    let value = serde_json::from_str(line).map_err(|e| Scout8Error::Malformed {
        url: url.to_string(),
        reason: format!("stream chunk is not JSON: {e}"),
    })?;
    chunks.push(value);
    Ok(())
}
