//! RFC 7517-style public verification keys.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use jsonwebtoken::DecodingKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::{Result, Scout8Error};

/// A single public verification key, keyed by `kid` within a [`KeySet`].
///
/// Key material is kty-specific: RSA carries `n`/`e`, EC carries
/// `crv`/`x`/`y`, OKP (Ed25519) carries `crv`/`x`. The optional `exp`
/// (seconds since epoch) marks when the entry stops being trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// An unordered key collection, unique by `kid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    #[serde(default)]
    pub keys: Vec<KeyEntry>,
}

impl KeyEntry {
    /// Structural validation applied before an entry enters a store.
    /// Returns the entry's `kid` on success.
    pub fn validate(&self) -> std::result::Result<&str, String> {
        let kid = match self.kid.as_deref() {
            Some(kid) if !kid.is_empty() => kid,
            _ => return Err("missing or empty kid".to_string()),
        };
        match self.kty.as_str() {
            "RSA" => {
                if self.n.is_none() || self.e.is_none() {
                    return Err(format!("RSA key {kid} is missing n or e"));
                }
            }
            "EC" => {
                if self.crv.is_none() || self.x.is_none() || self.y.is_none() {
                    return Err(format!("EC key {kid} is missing crv, x or y"));
                }
            }
            "OKP" => {
                if self.crv.as_deref() != Some("Ed25519") {
                    return Err(format!(
                        "OKP key {kid} has unsupported curve {:?}",
                        self.crv
                    ));
                }
                if self.x.is_none() {
                    return Err(format!("OKP key {kid} is missing x"));
                }
            }
            other => return Err(format!("unknown key type: {other}")),
        }
        Ok(kid)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.exp, Some(exp) if exp <= now)
    }

    /// Whether this key's type can produce signatures under `alg`.
    pub fn matches_algorithm(&self, alg: &str) -> bool {
        match self.kty.as_str() {
            "RSA" => alg.starts_with("RS") || alg.starts_with("PS"),
            "EC" => alg.starts_with("ES"),
            "OKP" => alg == "EdDSA",
            _ => false,
        }
    }

    pub fn to_decoding_key(&self) -> Result<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| missing(self, "n"))?;
                let e = self.e.as_deref().ok_or_else(|| missing(self, "e"))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| Scout8Error::KeySourceError(e.to_string()))
            }
            "EC" => {
                let x = self.x.as_deref().ok_or_else(|| missing(self, "x"))?;
                let y = self.y.as_deref().ok_or_else(|| missing(self, "y"))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| Scout8Error::KeySourceError(e.to_string()))
            }
            "OKP" => {
                let x = self.x.as_deref().ok_or_else(|| missing(self, "x"))?;
                DecodingKey::from_ed_components(x)
                    .map_err(|e| Scout8Error::KeySourceError(e.to_string()))
            }
            other => Err(Scout8Error::KeySourceError(format!("unknown key type: {other}"))),
        }
    }
}

fn missing(entry: &KeyEntry, field: &str) -> Scout8Error {
    Scout8Error::KeySourceError(format!(
        "key {} is missing {field}",
        entry.kid.as_deref().unwrap_or("<unnamed>")
    ))
}

impl KeySet {
    pub fn find(&self, kid: &str) -> Option<&KeyEntry> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A freshly generated Ed25519 signing key with its publishable half.
pub struct GeneratedKey {
    /// Private key in PKCS#8 DER form, usable with
    /// [`jsonwebtoken::EncodingKey::from_ed_der`].
    pub pkcs8_der: Vec<u8>,
    /// Public JWK for the key set.
    pub public_jwk: KeyEntry,
    /// Private JWK (OKP with `d`) for operators that persist the key.
    pub private_jwk: serde_json::Value,
}

/// Generate a fresh Ed25519 signing key under the given `kid`.
pub fn generate_ed25519(kid: &str) -> Result<GeneratedKey> {
    let signing_key = SigningKey::generate(&mut OsRng);
    let pkcs8_der = signing_key
        .to_pkcs8_der()
        .map_err(|e| Scout8Error::SigningError(format!("pkcs8 encoding failed: {e}")))?
        .as_bytes()
        .to_vec();

    let x = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());
    let d = URL_SAFE_NO_PAD.encode(signing_key.to_bytes());

    let public_jwk = KeyEntry {
        kid: Some(kid.to_string()),
        kty: "OKP".to_string(),
        alg: Some("EdDSA".to_string()),
        key_use: Some("sig".to_string()),
        n: None,
        e: None,
        crv: Some("Ed25519".to_string()),
        x: Some(x.clone()),
        y: None,
        exp: None,
    };

    let private_jwk = serde_json::json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "kid": kid,
        "alg": "EdDSA",
        "use": "sig",
        "x": x,
        "d": d,
    });

    Ok(GeneratedKey { pkcs8_der, public_jwk, private_jwk })
}
