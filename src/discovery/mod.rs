//! Stateless discovery: every call recomputes the live view from cluster
//! labels plus network probes. Nothing here is cached or persisted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::card::types::AgentCard;
use crate::card::CardFetcher;
use crate::k8s::types::CandidateResource;
use crate::trust::verifier::{SignatureVerifier, VerificationStatus};
use crate::{Result, Scout8Error};

/// Which namespaces a discovery call scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryScope {
    Namespace(String),
    AllNamespaces,
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Probe each candidate's card and health endpoints.
    pub verify_endpoints: bool,
    /// Only mark `Ready` when the card signature verifies.
    pub require_signature: bool,
    /// Overall wall-clock budget; expired probes yield `Unreachable`
    /// records while completed ones are returned as-is.
    pub deadline: Option<Duration>,
    /// Fan-out cap, to avoid overwhelming target agents.
    pub concurrency: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            verify_endpoints: false,
            require_signature: false,
            deadline: None,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentPhase {
    Ready,
    Unreachable,
    Unverified,
}

/// Per-query synthesized status of one candidate. Never persisted; a
/// `Ready` record from a prior call carries no guarantee for the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRecord {
    pub namespace: String,
    pub name: String,
    pub agent_class: String,
    pub agent_name: String,
    pub phase: AgentPhase,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<AgentCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Boundary to the cluster resource store. The production implementation
/// wraps the Kubernetes client; tests plug in [`StaticCandidateSource`].
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn list_candidates(&self, scope: &DiscoveryScope) -> Result<Vec<CandidateResource>>;
}

/// Fixed candidate list, used by tests and by single-target CLI commands
/// that never touch the cluster.
#[derive(Debug, Clone, Default)]
pub struct StaticCandidateSource {
    pub candidates: Vec<CandidateResource>,
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    async fn list_candidates(&self, scope: &DiscoveryScope) -> Result<Vec<CandidateResource>> {
        Ok(self
            .candidates
            .iter()
            .filter(|c| match scope {
                DiscoveryScope::AllNamespaces => true,
                DiscoveryScope::Namespace(ns) => &c.namespace == ns,
            })
            .cloned()
            .collect())
    }
}

pub struct DiscoveryEngine {
    source: Arc<dyn CandidateSource>,
    fetcher: CardFetcher,
    verifier: Arc<SignatureVerifier>,
}

impl DiscoveryEngine {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        fetcher: CardFetcher,
        verifier: Arc<SignatureVerifier>,
    ) -> Self {
        Self { source, fetcher, verifier }
    }

    /// Synthesize one record per labeled candidate in scope.
    ///
    /// A single candidate's failure never aborts the batch. Records are
    /// sorted by (namespace, name) so equal input state yields equal
    /// output, whatever order the probes complete in.
    pub async fn discover(
        &self,
        scope: &DiscoveryScope,
        options: &DiscoveryOptions,
    ) -> Result<Vec<DiscoveryRecord>> {
        let candidates = self.source.list_candidates(scope).await?;
        info!(candidates = candidates.len(), ?scope, "Starting discovery pass");

        let concurrency = options.concurrency.max(1);
        let probes = futures::stream::iter(candidates.clone())
            .map(|candidate| self.probe(candidate, options))
            .buffer_unordered(concurrency);
        futures::pin_mut!(probes);

        let mut records: Vec<DiscoveryRecord> = Vec::with_capacity(candidates.len());
        match options.deadline {
            None => {
                while let Some(record) = probes.next().await {
                    records.push(record);
                }
            }
            Some(deadline) => {
                let expiry = tokio::time::sleep(deadline);
                tokio::pin!(expiry);
                loop {
                    tokio::select! {
                        biased;
                        record = probes.next() => match record {
                            Some(record) => records.push(record),
                            None => break,
                        },
                        _ = &mut expiry => {
                            warn!(?deadline, "Discovery deadline expired, abandoning in-flight probes");
                            break;
                        }
                    }
                }
            }
        }

        // Candidates abandoned at the deadline still get a record each.
        let completed: HashSet<(String, String)> = records
            .iter()
            .map(|r| (r.namespace.clone(), r.name.clone()))
            .collect();
        for candidate in candidates {
            if !completed.contains(&(candidate.namespace.clone(), candidate.name.clone())) {
                records.push(unreachable_record(&candidate, "discovery deadline exceeded"));
            }
        }

        records.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(records)
    }

    async fn probe(
        &self,
        candidate: CandidateResource,
        options: &DiscoveryOptions,
    ) -> DiscoveryRecord {
        let endpoint_url = candidate
            .address
            .as_deref()
            .map(|address| format!("{}{}", address.trim_end_matches('/'), candidate.card_path));

        if !options.verify_endpoints {
            // Presence-only listing: nothing was probed, so nothing can
            // honestly be Ready.
            return DiscoveryRecord {
                phase: AgentPhase::Unverified,
                last_seen: Utc::now(),
                endpoint_url,
                healthy: None,
                card: None,
                verification: None,
                error: None,
                ..record_identity(&candidate)
            };
        }

        let Some(address) = candidate.address.clone() else {
            return unreachable_record(&candidate, "no routable address for candidate");
        };

        let healthy = Some(self.fetcher.check_health(&address).await);

        match self.fetcher.fetch(&address, &candidate.card_path).await {
            Ok(fetched) => {
                let (phase, verification) = if options.require_signature {
                    let status = self.verifier.verify(&fetched.raw).await;
                    let phase = if status.is_verified() {
                        AgentPhase::Ready
                    } else {
                        AgentPhase::Unverified
                    };
                    (phase, Some(status))
                } else {
                    (AgentPhase::Ready, None)
                };
                DiscoveryRecord {
                    phase,
                    last_seen: Utc::now(),
                    endpoint_url: Some(fetched.url),
                    healthy,
                    card: Some(fetched.card),
                    verification,
                    error: None,
                    ..record_identity(&candidate)
                }
            }
            Err(Scout8Error::Malformed { url, reason }) => {
                debug!(url = %url, reason = %reason, "Candidate served a malformed card");
                DiscoveryRecord {
                    phase: AgentPhase::Unverified,
                    last_seen: Utc::now(),
                    endpoint_url: Some(url),
                    healthy,
                    card: None,
                    verification: None,
                    error: Some(reason),
                    ..record_identity(&candidate)
                }
            }
            Err(e) => {
                debug!(error = %e, "Candidate probe failed");
                let mut record = unreachable_record(&candidate, &e.to_string());
                record.healthy = healthy;
                record
            }
        }
    }
}

fn record_identity(candidate: &CandidateResource) -> DiscoveryRecord {
    DiscoveryRecord {
        namespace: candidate.namespace.clone(),
        name: candidate.name.clone(),
        agent_class: candidate.agent_class.clone(),
        agent_name: candidate.agent_name.clone(),
        phase: AgentPhase::Unverified,
        last_seen: Utc::now(),
        endpoint_url: None,
        healthy: None,
        card: None,
        verification: None,
        error: None,
    }
}

fn unreachable_record(candidate: &CandidateResource, reason: &str) -> DiscoveryRecord {
    DiscoveryRecord {
        phase: AgentPhase::Unreachable,
        last_seen: Utc::now(),
        endpoint_url: candidate
            .address
            .as_deref()
            .map(|address| format!("{}{}", address.trim_end_matches('/'), candidate.card_path)),
        error: Some(reason.to_string()),
        ..record_identity(candidate)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use axum::routing::get;
    use axum::{Json, Router};

    use super::*;
    use crate::config::TrustPolicy;
    use crate::trust::keys::KeySet;
    use crate::trust::store::TrustStore;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn live_agent(name: &str) -> String {
        let card = serde_json::json!({"name": name, "version": "0.1.0"});
        serve(Router::new().route(
            "/.well-known/agent.json",
            get(move || async move { Json(card) }),
        ))
        .await
    }

    /// Accepts connections and never answers, so probes run into their
    /// timeout.
    async fn black_hole() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => held.push(socket),
                    Err(_) => break,
                }
            }
        });
        format!("http://{addr}")
    }

    fn candidate(namespace: &str, name: &str, address: Option<String>) -> CandidateResource {
        CandidateResource {
            namespace: namespace.to_string(),
            name: name.to_string(),
            agent_class: "a2a".to_string(),
            agent_name: name.to_string(),
            card_path: "/.well-known/agent.json".to_string(),
            address,
        }
    }

    fn engine(candidates: Vec<CandidateResource>, timeout: Duration) -> DiscoveryEngine {
        let source = Arc::new(StaticCandidateSource { candidates });
        let fetcher = CardFetcher::new(timeout, false).unwrap();
        let verifier = SignatureVerifier::new(
            TrustPolicy::default(),
            Arc::new(TrustStore::with_keys(KeySet::default())),
        )
        .unwrap();
        DiscoveryEngine::new(source, fetcher, Arc::new(verifier))
    }

    fn phases(records: &[DiscoveryRecord]) -> Vec<(String, AgentPhase)> {
        records.iter().map(|r| (r.name.clone(), r.phase)).collect()
    }

    #[tokio::test]
    async fn test_one_record_per_candidate_with_mixed_outcomes() {
        let live_a = live_agent("alpha").await;
        let live_b = live_agent("beta").await;
        let live_c = live_agent("gamma").await;
        let dead = black_hole().await;

        let engine = engine(
            vec![
                candidate("apps", "alpha", Some(live_a)),
                candidate("apps", "beta", Some(live_b)),
                candidate("apps", "gamma", Some(live_c)),
                candidate("apps", "stuck", Some(dead)),
            ],
            Duration::from_millis(800),
        );

        let records = engine
            .discover(
                &DiscoveryScope::AllNamespaces,
                &DiscoveryOptions { verify_endpoints: true, ..DiscoveryOptions::default() },
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(
            phases(&records),
            vec![
                ("alpha".to_string(), AgentPhase::Ready),
                ("beta".to_string(), AgentPhase::Ready),
                ("gamma".to_string(), AgentPhase::Ready),
                ("stuck".to_string(), AgentPhase::Unreachable),
            ]
        );
        // The failure stays local: live candidates carry cards, no errors.
        for record in records.iter().filter(|r| r.name != "stuck") {
            assert!(record.card.is_some());
            assert!(record.error.is_none());
        }
    }

    #[tokio::test]
    async fn test_candidate_without_address_is_unreachable() {
        let engine = engine(
            vec![candidate("apps", "lost", None)],
            Duration::from_millis(500),
        );
        let records = engine
            .discover(
                &DiscoveryScope::AllNamespaces,
                &DiscoveryOptions { verify_endpoints: true, ..DiscoveryOptions::default() },
            )
            .await
            .unwrap();
        assert_eq!(records[0].phase, AgentPhase::Unreachable);
        assert!(records[0].error.as_deref().unwrap().contains("no routable address"));
    }

    #[tokio::test]
    async fn test_listing_without_probe_is_unverified() {
        let engine = engine(
            vec![candidate("apps", "quiet", Some("http://127.0.0.1:9".to_string()))],
            Duration::from_millis(500),
        );
        let records = engine
            .discover(&DiscoveryScope::AllNamespaces, &DiscoveryOptions::default())
            .await
            .unwrap();
        assert_eq!(records[0].phase, AgentPhase::Unverified);
        assert!(records[0].card.is_none());
        // The endpoint URL is still resolved for the caller's benefit.
        assert!(records[0].endpoint_url.as_deref().unwrap().ends_with("/.well-known/agent.json"));
    }

    #[tokio::test]
    async fn test_namespace_scope_filters() {
        let engine = engine(
            vec![candidate("team-a", "one", None), candidate("team-b", "two", None)],
            Duration::from_millis(500),
        );
        let records = engine
            .discover(
                &DiscoveryScope::Namespace("team-a".to_string()),
                &DiscoveryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "one");
    }

    #[tokio::test]
    async fn test_fanout_bounds_latency() {
        // 8 black holes, per-fetch timeout 500ms, cap 8: one wave of
        // timeouts, nowhere near the serial 4s.
        let mut candidates = Vec::new();
        for i in 0..8 {
            candidates.push(candidate("apps", &format!("hole-{i}"), Some(black_hole().await)));
        }
        let engine = engine(candidates, Duration::from_millis(500));

        let started = Instant::now();
        let records = engine
            .discover(
                &DiscoveryScope::AllNamespaces,
                &DiscoveryOptions {
                    verify_endpoints: true,
                    concurrency: 8,
                    ..DiscoveryOptions::default()
                },
            )
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(records.len(), 8);
        assert!(records.iter().all(|r| r.phase == AgentPhase::Unreachable));
        assert!(
            elapsed < Duration::from_millis(3000),
            "fan-out took {elapsed:?}, looks serialized"
        );
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_results() {
        let live = live_agent("fast").await;
        let engine = engine(
            vec![
                candidate("apps", "fast", Some(live)),
                candidate("apps", "slow", Some(black_hole().await)),
            ],
            Duration::from_secs(30),
        );

        let records = engine
            .discover(
                &DiscoveryScope::AllNamespaces,
                &DiscoveryOptions {
                    verify_endpoints: true,
                    deadline: Some(Duration::from_millis(900)),
                    ..DiscoveryOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        let fast = records.iter().find(|r| r.name == "fast").unwrap();
        let slow = records.iter().find(|r| r.name == "slow").unwrap();
        assert_eq!(fast.phase, AgentPhase::Ready);
        assert_eq!(slow.phase, AgentPhase::Unreachable);
        assert!(slow.error.as_deref().unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn test_malformed_card_downgrades_to_unverified() {
        let origin = serve(
            Router::new().route("/.well-known/agent.json", get(|| async { "[1,2,3" })),
        )
        .await;
        let engine = engine(
            vec![candidate("apps", "garbled", Some(origin))],
            Duration::from_millis(800),
        );
        let records = engine
            .discover(
                &DiscoveryScope::AllNamespaces,
                &DiscoveryOptions { verify_endpoints: true, ..DiscoveryOptions::default() },
            )
            .await
            .unwrap();
        assert_eq!(records[0].phase, AgentPhase::Unverified);
        assert!(records[0].error.is_some());
    }
}
