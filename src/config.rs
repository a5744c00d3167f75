use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::trust::sources::KeySetSource;
use crate::{Result, Scout8Error};

/// Environment variable prefix for all configuration knobs.
pub const ENV_PREFIX: &str = "SCOUT8_";

/// Signature algorithms accepted by default. Symmetric algorithms and
/// `none` are never accepted regardless of configuration.
pub const DEFAULT_ALLOWED_ALGORITHMS: &[&str] = &["EdDSA", "ES256", "RS256"];

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DISCOVERY_CONCURRENCY: usize = 8;

/// Trust policy governing card verification and key resolution.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    /// Refuse single-target operations against cards that do not verify.
    pub require_verified_card: bool,
    /// Ordered key-set sources, first applicable wins.
    pub trusted_keys: Vec<KeySetSource>,
    /// Permit fetching a `jku` key set over plain HTTP.
    pub allow_http_key_source: bool,
    pub allowed_algorithms: Vec<String>,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            require_verified_card: false,
            trusted_keys: Vec::new(),
            allow_http_key_source: false,
            allowed_algorithms: DEFAULT_ALLOWED_ALGORITHMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Card signing configuration (the agent-side half of the trust lifecycle).
#[derive(Debug, Clone, Default)]
pub struct SigningConfig {
    pub sign_cards: bool,
    /// Inline private JWK JSON. Takes priority over `jwk_path`.
    pub jwk_json: Option<String>,
    /// Private key file: a JWK document or a PEM-encoded key.
    pub jwk_path: Option<PathBuf>,
    /// Key id override; defaults to the key's own `kid` when present.
    pub kid: Option<String>,
    /// Algorithm override; defaults to EdDSA for generated keys.
    pub alg: Option<String>,
    pub publish_jwks: bool,
    /// `jku` value stamped into signature headers.
    pub jwks_url: Option<String>,
}

/// Outbound probe configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub concurrency: usize,
    /// Overall wall-clock budget for one discovery pass; `None` lets the
    /// per-fetch timeouts bound it.
    pub discovery_deadline: Option<Duration>,
    /// Skip TLS certificate verification on outbound probes. Off by default.
    pub allow_insecure_tls: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            concurrency: DEFAULT_DISCOVERY_CONCURRENCY,
            discovery_deadline: None,
            allow_insecure_tls: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub policy: TrustPolicy,
    pub signing: SigningConfig,
    pub fetch: FetchConfig,
}

/// Flat on-disk / environment representation of [`Config`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    require_verified_card: bool,
    trusted_keys_json: Option<String>,
    trusted_keys_path: Option<String>,
    trusted_keys_url: Option<String>,
    allow_http_key_source: bool,
    insecure_skip_tls_verify: bool,
    fetch_timeout_secs: Option<u64>,
    discovery_concurrency: Option<usize>,
    discovery_deadline_secs: Option<u64>,
    sign_card: bool,
    signing_jwk_json: Option<String>,
    signing_jwk_path: Option<String>,
    signing_kid: Option<String>,
    signing_alg: Option<String>,
    publish_jwks: bool,
    jwks_url: Option<String>,
}

impl Config {
    /// Read configuration from `SCOUT8_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Read configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawConfig = serde_yaml::from_str(&text)
            .map_err(|e| Scout8Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        raw.build()
    }

    /// Build configuration from a key lookup. The lookup receives the bare
    /// variable name without the `SCOUT8_` prefix.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = RawConfig {
            require_verified_card: parse_bool(get("REQUIRE_VERIFIED_CARD")),
            trusted_keys_json: get("TRUSTED_KEYS_JSON"),
            trusted_keys_path: get("TRUSTED_KEYS_PATH"),
            trusted_keys_url: get("TRUSTED_KEYS_URL"),
            allow_http_key_source: parse_bool(get("ALLOW_HTTP_KEY_SOURCE")),
            insecure_skip_tls_verify: parse_bool(get("INSECURE_SKIP_TLS_VERIFY")),
            fetch_timeout_secs: parse_num(get("FETCH_TIMEOUT_SECS"), "FETCH_TIMEOUT_SECS")?,
            discovery_concurrency: parse_num(
                get("DISCOVERY_CONCURRENCY"),
                "DISCOVERY_CONCURRENCY",
            )?,
            discovery_deadline_secs: parse_num(
                get("DISCOVERY_DEADLINE_SECS"),
                "DISCOVERY_DEADLINE_SECS",
            )?,
            sign_card: parse_bool(get("SIGN_CARD")),
            signing_jwk_json: get("SIGNING_JWK_JSON"),
            signing_jwk_path: get("SIGNING_JWK_PATH"),
            signing_kid: get("SIGNING_KID"),
            signing_alg: get("SIGNING_ALG"),
            publish_jwks: parse_bool(get("PUBLISH_JWKS")),
            jwks_url: get("JWKS_URL"),
        };
        raw.build()
    }
}

impl RawConfig {
    fn build(self) -> Result<Config> {
        // Source priority: inline JSON, then file, then URL.
        let mut trusted_keys = Vec::new();
        if let Some(json) = self.trusted_keys_json {
            trusted_keys.push(KeySetSource::Inline(json));
        }
        if let Some(path) = self.trusted_keys_path {
            trusted_keys.push(KeySetSource::File(PathBuf::from(path)));
        }
        if let Some(url) = self.trusted_keys_url {
            trusted_keys.push(KeySetSource::Url(url));
        }

        let mut concurrency = self.discovery_concurrency.unwrap_or(DEFAULT_DISCOVERY_CONCURRENCY);
        if concurrency == 0 {
            concurrency = 1;
        }

        Ok(Config {
            policy: TrustPolicy {
                require_verified_card: self.require_verified_card,
                trusted_keys,
                allow_http_key_source: self.allow_http_key_source,
                ..TrustPolicy::default()
            },
            signing: SigningConfig {
                sign_cards: self.sign_card,
                jwk_json: self.signing_jwk_json,
                jwk_path: self.signing_jwk_path.map(PathBuf::from),
                kid: self.signing_kid,
                alg: self.signing_alg,
                publish_jwks: self.publish_jwks,
                jwks_url: self.jwks_url,
            },
            fetch: FetchConfig {
                timeout: Duration::from_secs(
                    self.fetch_timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
                ),
                concurrency,
                discovery_deadline: self.discovery_deadline_secs.map(Duration::from_secs),
                allow_insecure_tls: self.insecure_skip_tls_verify,
            },
        })
    }
}

fn parse_bool(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

fn parse_num<T: std::str::FromStr>(value: Option<String>, name: &str) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Scout8Error::ConfigError(format!("{name} is not a number: {v}"))),
    }
}
