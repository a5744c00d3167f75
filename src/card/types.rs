use serde::{Deserialize, Serialize};

use crate::{Result, Scout8Error};

/// An agent's self-description document.
///
/// Only `name` is required; everything else degrades to empty defaults so a
/// sparse card from a third-party agent still parses. Skill `id`s are not
/// guaranteed unique — duplicates are valid but ambiguous, and callers must
/// not index by them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_transport: Option<String>,
    #[serde(default)]
    pub default_input_modes: Vec<String>,
    #[serde(default)]
    pub default_output_modes: Vec<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<AgentCardSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub input_modes: Vec<String>,
    #[serde(default)]
    pub output_modes: Vec<String>,
}

/// One JWS flattened-serialization envelope from a card's `signatures` list.
///
/// `protected` is the base64url-encoded header carrying `alg`, `kid` and
/// optionally `jku`; `signature` is the base64url signature over
/// `protected + "." + base64url(canonical payload)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCardSignature {
    pub protected: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<serde_json::Value>,
}

impl AgentCard {
    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }
}

/// Compute the byte stream a card signature covers.
///
/// The payload is the card JSON minus its `signatures` member, re-serialized
/// with lexicographically sorted keys and compact separators. Working from
/// the raw fetched bytes rather than [`AgentCard`] keeps fields this crate
/// does not model inside the signed payload.
pub fn canonical_payload(raw: &[u8]) -> Result<Vec<u8>> {
    let mut value: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| Scout8Error::Malformed {
            url: String::new(),
            reason: format!("card payload is not valid JSON: {e}"),
        })?;
    if let Some(object) = value.as_object_mut() {
        object.remove("signatures");
    }
    serde_json::to_vec(&value).map_err(|e| Scout8Error::Malformed {
        url: String::new(),
        reason: e.to_string(),
    })
}
