//! Fail-closed verification of agent card signatures.
//!
//! Any ambiguity — missing key, unreachable key source, disallowed
//! algorithm — yields a non-`Verified` status, never a silent pass.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::card::types::canonical_payload;
use crate::config::TrustPolicy;
use crate::trust::keys::KeyEntry;
use crate::trust::sources::fetch_key_set;
use crate::trust::store::TrustStore;
use crate::{Result, Scout8Error};

/// Outcome of verifying one card. Statuses other than `Verified` are data,
/// not errors: batch callers fold them into per-record fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum VerificationStatus {
    Verified { kid: String, alg: String },
    Unsigned,
    KeyNotFound { kid: String },
    SignatureInvalid { reason: String },
    KeySourceUnreachable { reason: String },
}

impl VerificationStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationStatus::Verified { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            VerificationStatus::Verified { kid, alg } => {
                format!("verified (kid {kid}, alg {alg})")
            }
            VerificationStatus::Unsigned => "card carries no signatures".to_string(),
            VerificationStatus::KeyNotFound { kid } => {
                format!("no trusted key for kid {kid}")
            }
            VerificationStatus::SignatureInvalid { reason } => {
                format!("signature invalid: {reason}")
            }
            VerificationStatus::KeySourceUnreachable { reason } => {
                format!("key source unreachable: {reason}")
            }
        }
    }
}

/// Protected JWS header fields this verifier understands.
#[derive(Debug, Deserialize)]
struct SignatureHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    jku: Option<String>,
    #[serde(default)]
    crit: Option<Vec<String>>,
}

enum KeyLookup {
    Found(KeyEntry),
    NotFound,
    SourceUnreachable(String),
}

pub struct SignatureVerifier {
    policy: TrustPolicy,
    store: Arc<TrustStore>,
    http: reqwest::Client,
}

impl SignatureVerifier {
    pub fn new(policy: TrustPolicy, store: Arc<TrustStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Scout8Error::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { policy, store, http })
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Verify every signature envelope on the card at `raw`. All envelopes
    /// must verify against trusted keys; the first failure decides the
    /// status.
    pub async fn verify(&self, raw: &[u8]) -> VerificationStatus {
        let value: serde_json::Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(e) => {
                return VerificationStatus::SignatureInvalid {
                    reason: format!("card payload is not valid JSON: {e}"),
                }
            }
        };

        let signatures = match value.get("signatures").and_then(|s| s.as_array()) {
            Some(signatures) if !signatures.is_empty() => signatures.clone(),
            _ => return VerificationStatus::Unsigned,
        };

        let payload = match canonical_payload(raw) {
            Ok(payload) => payload,
            Err(e) => {
                return VerificationStatus::SignatureInvalid { reason: e.to_string() }
            }
        };
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);

        let mut verified: Option<(String, String)> = None;
        for signature in &signatures {
            match self.verify_one(signature, &payload_b64).await {
                VerificationStatus::Verified { kid, alg } => {
                    verified.get_or_insert((kid, alg));
                }
                failure => return failure,
            }
        }

        match verified {
            Some((kid, alg)) => {
                debug!(kid = %kid, alg = %alg, "Card signature verified");
                VerificationStatus::Verified { kid, alg }
            }
            // Unreachable: the signatures list was non-empty.
            None => VerificationStatus::Unsigned,
        }
    }

    async fn verify_one(
        &self,
        signature: &serde_json::Value,
        payload_b64: &str,
    ) -> VerificationStatus {
        let invalid = |reason: String| VerificationStatus::SignatureInvalid { reason };

        let protected_b64 = match signature.get("protected").and_then(|p| p.as_str()) {
            Some(protected) => protected,
            None => return invalid("signature envelope has no protected header".to_string()),
        };
        let signature_b64 = match signature.get("signature").and_then(|s| s.as_str()) {
            Some(sig) => sig,
            None => return invalid("signature envelope has no signature".to_string()),
        };

        let header_bytes = match URL_SAFE_NO_PAD.decode(protected_b64) {
            Ok(bytes) => bytes,
            Err(e) => return invalid(format!("protected header is not base64url: {e}")),
        };
        let header: SignatureHeader = match serde_json::from_slice(&header_bytes) {
            Ok(header) => header,
            Err(e) => return invalid(format!("protected header is not valid JSON: {e}")),
        };

        // Algorithm-confusion guard: only allow-listed asymmetric signing
        // algorithms are ever attempted.
        if !self.policy.allowed_algorithms.iter().any(|a| a == &header.alg) {
            return invalid(format!("algorithm {} is not allow-listed", header.alg));
        }
        let algorithm: Algorithm = match header.alg.parse() {
            Ok(algorithm) => algorithm,
            Err(_) => return invalid(format!("unknown algorithm {}", header.alg)),
        };

        if let Some(crit) = &header.crit {
            if !crit.is_empty() {
                return invalid(format!("unsupported critical headers: {crit:?}"));
            }
        }

        let kid = match header.kid {
            Some(ref kid) if !kid.is_empty() => kid.clone(),
            _ => return invalid("protected header has no kid".to_string()),
        };

        let entry = match self.resolve_key(&kid, header.jku.as_deref()).await {
            KeyLookup::Found(entry) => entry,
            KeyLookup::NotFound => return VerificationStatus::KeyNotFound { kid },
            KeyLookup::SourceUnreachable(reason) => {
                return VerificationStatus::KeySourceUnreachable { reason }
            }
        };

        if let Some(key_use) = &entry.key_use {
            if key_use != "sig" {
                return invalid(format!("key {kid} has use {key_use}, expected sig"));
            }
        }
        if !entry.matches_algorithm(&header.alg) {
            return invalid(format!(
                "algorithm {} does not match key type {} of kid {kid}",
                header.alg, entry.kty
            ));
        }

        let decoding_key = match entry.to_decoding_key() {
            Ok(key) => key,
            Err(e) => return invalid(e.to_string()),
        };

        let signing_input = format!("{protected_b64}.{payload_b64}");
        match jsonwebtoken::crypto::verify(
            signature_b64,
            signing_input.as_bytes(),
            &decoding_key,
            algorithm,
        ) {
            Ok(true) => VerificationStatus::Verified { kid, alg: header.alg },
            Ok(false) => invalid("signature does not match payload".to_string()),
            Err(e) => invalid(e.to_string()),
        }
    }

    /// Resolve the key for `kid`: Trust Store snapshot first, then (when
    /// permitted) the envelope's remote `jku`. Expired entries are treated
    /// as absent.
    async fn resolve_key(&self, kid: &str, jku: Option<&str>) -> KeyLookup {
        let now = chrono::Utc::now().timestamp() as u64;

        if let Some(entry) = self.store.get().find(kid) {
            if entry.is_expired(now) {
                warn!(kid = %kid, "Trusted key has expired, treating as absent");
            } else {
                return KeyLookup::Found(entry.clone());
            }
        }

        if let Some(jku) = jku {
            if !jku.starts_with("https://") && !self.policy.allow_http_key_source {
                return KeyLookup::SourceUnreachable(format!(
                    "refusing non-HTTPS jku {jku} (set SCOUT8_ALLOW_HTTP_KEY_SOURCE to override)"
                ));
            }
            return match fetch_key_set(&self.http, jku).await {
                Ok(set) => match set.find(kid) {
                    Some(entry) if !entry.is_expired(now) => KeyLookup::Found(entry.clone()),
                    _ => KeyLookup::NotFound,
                },
                Err(e) => KeyLookup::SourceUnreachable(e.to_string()),
            };
        }

        KeyLookup::NotFound
    }
}
