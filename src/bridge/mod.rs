//! The external-facing API: list, discover, verify, message.

pub mod message;
pub mod server;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::card::{AgentCard, CardFetcher, WELL_KNOWN_CARD_PATH};
use crate::config::Config;
use crate::discovery::{
    CandidateSource, DiscoveryEngine, DiscoveryOptions, DiscoveryRecord, DiscoveryScope,
};
use crate::trust::sources::resolve_first;
use crate::trust::store::TrustStore;
use crate::trust::verifier::{SignatureVerifier, VerificationStatus};
use crate::{Result, Scout8Error};

use message::{AgentMessage, MessageClient};

/// A fetched card together with its verification outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardReport {
    pub url: String,
    pub card: AgentCard,
    pub verification: VerificationStatus,
}

/// A relayed message reply, annotated with the target's verification
/// outcome at relay time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReport {
    pub verification: VerificationStatus,
    pub response: AgentMessage,
}

/// Streamed variant of [`MessageReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamReport {
    pub verification: VerificationStatus,
    pub chunks: Vec<serde_json::Value>,
}

pub struct ProtocolBridge {
    engine: DiscoveryEngine,
    fetcher: CardFetcher,
    verifier: Arc<SignatureVerifier>,
    messages: MessageClient,
    store: Arc<TrustStore>,
    config: Config,
}

impl ProtocolBridge {
    /// Wire up the bridge: seed the trust store from the configured key
    /// sources, then build the verifier, fetcher, engine and messaging
    /// client around it.
    pub async fn new(source: Arc<dyn CandidateSource>, config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch.timeout)
            .danger_accept_invalid_certs(config.fetch.allow_insecure_tls)
            .build()
            .map_err(|e| Scout8Error::ConfigError(format!("failed to build HTTP client: {e}")))?;

        let store = Arc::new(TrustStore::new());
        if let Some(seed) = resolve_first(&config.policy.trusted_keys, &http).await? {
            let (merged, rejected) = store.merge(seed);
            if !rejected.is_empty() {
                return Err(Scout8Error::KeySourceError(format!(
                    "configured key set contains {} invalid entries",
                    rejected.len()
                )));
            }
            info!(keys = merged.len(), "Seeded trust store from configured source");
        } else if config.policy.require_verified_card {
            info!("Verified cards required but no trusted keys configured; only jku-resolvable cards can verify");
        }

        let verifier =
            Arc::new(SignatureVerifier::new(config.policy.clone(), store.clone())?);
        let fetcher = CardFetcher::new(config.fetch.timeout, config.fetch.allow_insecure_tls)?;
        let engine = DiscoveryEngine::new(source, fetcher.clone(), verifier.clone());
        let messages = MessageClient::new(config.fetch.timeout, config.fetch.allow_insecure_tls)?;

        Ok(Self { engine, fetcher, verifier, messages, store, config })
    }

    pub fn trust_store(&self) -> Arc<TrustStore> {
        self.store.clone()
    }

    /// Presence-only listing; no endpoint is probed.
    pub async fn list_agents(&self, scope: &DiscoveryScope) -> Result<Vec<DiscoveryRecord>> {
        self.engine
            .discover(scope, &DiscoveryOptions {
                verify_endpoints: false,
                concurrency: self.config.fetch.concurrency,
                deadline: self.config.fetch.discovery_deadline,
                ..DiscoveryOptions::default()
            })
            .await
    }

    /// Full probe, optionally gating `Ready` on signature verification.
    pub async fn discover_agents(
        &self,
        scope: &DiscoveryScope,
        verify_endpoints: bool,
        require_signature: bool,
    ) -> Result<Vec<DiscoveryRecord>> {
        self.engine
            .discover(scope, &DiscoveryOptions {
                verify_endpoints,
                require_signature,
                concurrency: self.config.fetch.concurrency,
                deadline: self.config.fetch.discovery_deadline,
            })
            .await
    }

    /// Fetch one card and verify it. Refuses when the policy mandates
    /// verified cards and this one does not verify.
    pub async fn get_card(&self, origin: &str, path: Option<&str>) -> Result<CardReport> {
        let fetched = self
            .fetcher
            .fetch(origin, path.unwrap_or(WELL_KNOWN_CARD_PATH))
            .await?;
        let verification = self.verifier.verify(&fetched.raw).await;

        if self.config.policy.require_verified_card && !verification.is_verified() {
            return Err(Scout8Error::PolicyViolation(format!(
                "verified card required, but {}: {}",
                fetched.url,
                verification.describe()
            )));
        }

        Ok(CardReport { url: fetched.url, card: fetched.card, verification })
    }

    /// Relay a message to the agent at `origin`, applying the trust policy
    /// before anything is sent.
    pub async fn send_message(&self, origin: &str, text: &str) -> Result<MessageReport> {
        let report = self.get_card(origin, None).await?;
        let target = report.card.url.clone().unwrap_or_else(|| origin.to_string());
        let response = self.messages.send(&target, text).await?;
        Ok(MessageReport { verification: report.verification, response })
    }

    /// Streamed variant of [`send_message`](Self::send_message).
    pub async fn send_message_streaming(
        &self,
        origin: &str,
        text: &str,
    ) -> Result<StreamReport> {
        let report = self.get_card(origin, None).await?;
        let target = report.card.url.clone().unwrap_or_else(|| origin.to_string());
        let chunks = self.messages.send_streaming(&target, text).await?;
        Ok(StreamReport { verification: report.verification, chunks })
    }
}
