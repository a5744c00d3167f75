//! Agent-side card signing: load or generate a key, sign canonical payloads.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey};
use serde::Deserialize;
use tracing::info;

use crate::card::types::canonical_payload;
use crate::config::SigningConfig;
use crate::trust::keys::{generate_ed25519, KeyEntry, KeySet};
use crate::{Result, Scout8Error};

const DEFAULT_KID: &str = "scout8-signing-key";

/// Private JWK shape accepted from inline JSON or a key file.
#[derive(Deserialize)]
struct PrivateJwk {
    kty: String,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    d: Option<String>,
}

/// Signs agent cards with a configured or freshly generated key.
pub struct CardSigner {
    encoding_key: EncodingKey,
    kid: String,
    alg: Algorithm,
    alg_name: String,
    jku: Option<String>,
    public_jwk: Option<KeyEntry>,
}

impl CardSigner {
    /// Build a signer from configuration: inline private JWK first, then a
    /// key file (JWK or PEM), else a freshly generated Ed25519 key.
    pub fn from_config(config: &SigningConfig) -> Result<Self> {
        let alg_name = config.alg.clone().unwrap_or_else(|| "EdDSA".to_string());
        let alg: Algorithm = alg_name
            .parse()
            .map_err(|_| Scout8Error::SigningError(format!("unknown algorithm: {alg_name}")))?;

        if let Some(json) = &config.jwk_json {
            return Self::from_jwk_json(json, config);
        }

        if let Some(path) = &config.jwk_path {
            let text = std::fs::read_to_string(path).map_err(|e| {
                Scout8Error::SigningError(format!("failed to read {}: {e}", path.display()))
            })?;
            if text.contains("-----BEGIN") {
                return Self::from_pem(&text, config, alg, alg_name);
            }
            return Self::from_jwk_json(&text, config);
        }

        // No key material configured: generate a fresh Ed25519 key.
        let kid = config.kid.clone().unwrap_or_else(|| DEFAULT_KID.to_string());
        info!(kid = %kid, "Generating new Ed25519 card signing key");
        let generated = generate_ed25519(&kid)?;
        Ok(Self {
            encoding_key: EncodingKey::from_ed_der(&generated.pkcs8_der),
            kid,
            alg: Algorithm::EdDSA,
            alg_name: "EdDSA".to_string(),
            jku: config.jwks_url.clone(),
            public_jwk: Some(generated.public_jwk),
        })
    }

    fn from_jwk_json(json: &str, config: &SigningConfig) -> Result<Self> {
        let jwk: PrivateJwk = serde_json::from_str(json)
            .map_err(|e| Scout8Error::SigningError(format!("invalid private JWK: {e}")))?;
        if jwk.kty != "OKP" || jwk.crv.as_deref() != Some("Ed25519") {
            return Err(Scout8Error::SigningError(format!(
                "unsupported private JWK type {} (only OKP/Ed25519 JWKs are accepted; use a PEM file for RSA or EC keys)",
                jwk.kty
            )));
        }
        let d = jwk
            .d
            .as_deref()
            .ok_or_else(|| Scout8Error::SigningError("private JWK is missing d".to_string()))?;
        let secret = URL_SAFE_NO_PAD
            .decode(d)
            .map_err(|e| Scout8Error::SigningError(format!("invalid d in private JWK: {e}")))?;
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| Scout8Error::SigningError("d must be 32 bytes".to_string()))?;
        let signing_key = SigningKey::from_bytes(&secret);
        let pkcs8 = signing_key
            .to_pkcs8_der()
            .map_err(|e| Scout8Error::SigningError(format!("pkcs8 encoding failed: {e}")))?;

        let kid = config
            .kid
            .clone()
            .or(jwk.kid)
            .unwrap_or_else(|| DEFAULT_KID.to_string());
        let x = jwk
            .x
            .unwrap_or_else(|| URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes()));

        Ok(Self {
            encoding_key: EncodingKey::from_ed_der(pkcs8.as_bytes()),
            kid: kid.clone(),
            // An Ed25519 JWK always signs as EdDSA regardless of the
            // configured override.
            alg: Algorithm::EdDSA,
            alg_name: jwk.alg.unwrap_or_else(|| "EdDSA".to_string()),
            jku: config.jwks_url.clone(),
            public_jwk: Some(KeyEntry {
                kid: Some(kid),
                kty: "OKP".to_string(),
                alg: Some("EdDSA".to_string()),
                key_use: Some("sig".to_string()),
                n: None,
                e: None,
                crv: Some("Ed25519".to_string()),
                x: Some(x),
                y: None,
                exp: None,
            }),
        })
    }

    fn from_pem(
        pem: &str,
        config: &SigningConfig,
        alg: Algorithm,
        alg_name: String,
    ) -> Result<Self> {
        let encoding_key = match alg {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                EncodingKey::from_rsa_pem(pem.as_bytes())
            }
            Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem.as_bytes()),
            Algorithm::EdDSA => EncodingKey::from_ed_pem(pem.as_bytes()),
            other => {
                return Err(Scout8Error::SigningError(format!(
                    "algorithm {other:?} is not supported for signing"
                )))
            }
        }
        .map_err(|e| Scout8Error::SigningError(format!("invalid PEM key: {e}")))?;

        Ok(Self {
            encoding_key,
            kid: config.kid.clone().unwrap_or_else(|| DEFAULT_KID.to_string()),
            alg,
            alg_name,
            jku: config.jwks_url.clone(),
            // The public half of a PEM key is published out of band.
            public_jwk: None,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign `card` in place, replacing any existing signature envelopes.
    ///
    /// The signature covers the canonical payload (sorted keys, compact,
    /// no `signatures` member), so verification from raw bytes matches.
    pub fn sign_card(&self, card: &mut serde_json::Value) -> Result<()> {
        let object = card
            .as_object_mut()
            .ok_or_else(|| Scout8Error::SigningError("card must be a JSON object".to_string()))?;
        object.remove("signatures");

        let payload = canonical_payload(&serde_json::to_vec(&*object).map_err(|e| {
            Scout8Error::SigningError(e.to_string())
        })?)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);

        let mut protected = serde_json::json!({
            "alg": self.alg_name,
            "kid": self.kid,
        });
        if let Some(jku) = &self.jku {
            protected["jku"] = serde_json::Value::String(jku.clone());
        }
        let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected).map_err(
            |e| Scout8Error::SigningError(e.to_string()),
        )?);

        let signing_input = format!("{protected_b64}.{payload_b64}");
        let signature =
            jsonwebtoken::crypto::sign(signing_input.as_bytes(), &self.encoding_key, self.alg)
                .map_err(|e| Scout8Error::SigningError(e.to_string()))?;

        let object = card.as_object_mut().expect("checked above");
        object.insert(
            "signatures".to_string(),
            serde_json::json!([{ "protected": protected_b64, "signature": signature }]),
        );
        Ok(())
    }

    /// Publishable key set holding this signer's public half, when known.
    pub fn public_key_set(&self) -> KeySet {
        KeySet { keys: self.public_jwk.clone().into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated_signer() -> CardSigner {
        CardSigner::from_config(&SigningConfig {
            sign_cards: true,
            kid: Some("test-key".to_string()),
            ..SigningConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_generated_signer_publishes_its_key() {
        let signer = generated_signer();
        let set = signer.public_key_set();
        assert_eq!(set.len(), 1);
        assert_eq!(set.keys[0].kid.as_deref(), Some("test-key"));
        assert_eq!(set.keys[0].kty, "OKP");
    }

    #[test]
    fn test_sign_card_appends_envelope() {
        let signer = generated_signer();
        let mut card = serde_json::json!({"name": "echo", "version": "1.0"});
        signer.sign_card(&mut card).unwrap();

        let signatures = card["signatures"].as_array().unwrap();
        assert_eq!(signatures.len(), 1);
        let protected = URL_SAFE_NO_PAD
            .decode(signatures[0]["protected"].as_str().unwrap())
            .unwrap();
        let header: serde_json::Value = serde_json::from_slice(&protected).unwrap();
        assert_eq!(header["alg"], "EdDSA");
        assert_eq!(header["kid"], "test-key");
        assert!(header.get("jku").is_none());
    }

    #[test]
    fn test_sign_card_replaces_stale_signatures() {
        let signer = generated_signer();
        let mut card = serde_json::json!({
            "name": "echo",
            "signatures": [{"protected": "stale", "signature": "stale"}]
        });
        signer.sign_card(&mut card).unwrap();
        let signatures = card["signatures"].as_array().unwrap();
        assert_eq!(signatures.len(), 1);
        assert_ne!(signatures[0]["protected"], "stale");
    }

    #[test]
    fn test_jku_header_from_config() {
        let signer = CardSigner::from_config(&SigningConfig {
            sign_cards: true,
            jwks_url: Some("https://agent.example/.well-known/jwks.json".to_string()),
            ..SigningConfig::default()
        })
        .unwrap();
        let mut card = serde_json::json!({"name": "echo"});
        signer.sign_card(&mut card).unwrap();
        let protected = URL_SAFE_NO_PAD
            .decode(card["signatures"][0]["protected"].as_str().unwrap())
            .unwrap();
        let header: serde_json::Value = serde_json::from_slice(&protected).unwrap();
        assert_eq!(header["jku"], "https://agent.example/.well-known/jwks.json");
    }

    #[test]
    fn test_inline_private_jwk_round_trip() {
        let generated = generate_ed25519("inline-key").unwrap();
        let signer = CardSigner::from_config(&SigningConfig {
            sign_cards: true,
            jwk_json: Some(generated.private_jwk.to_string()),
            ..SigningConfig::default()
        })
        .unwrap();
        assert_eq!(signer.kid(), "inline-key");
        // The derived public half matches the generated one.
        assert_eq!(signer.public_key_set().keys[0].x, generated.public_jwk.x);
    }

    #[test]
    fn test_inline_jwk_requires_ed25519() {
        let result = CardSigner::from_config(&SigningConfig {
            jwk_json: Some(r#"{"kty":"RSA","n":"x","e":"AQAB","d":"y"}"#.to_string()),
            ..SigningConfig::default()
        });
        assert!(matches!(result, Err(Scout8Error::SigningError(_))));
    }

    #[test]
    fn test_missing_key_file_is_an_error() {
        let result = CardSigner::from_config(&SigningConfig {
            jwk_path: Some("/nonexistent/key.json".into()),
            ..SigningConfig::default()
        });
        assert!(matches!(result, Err(Scout8Error::SigningError(_))));
    }
}
