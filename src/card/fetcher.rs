use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::card::types::AgentCard;
use crate::{Result, Scout8Error};

/// Default location of an agent's self-description document.
pub const WELL_KNOWN_CARD_PATH: &str = "/.well-known/agent.json";

/// Default liveness path probed when endpoint verification is requested.
pub const HEALTH_PATH: &str = "/health";

/// A fetched card together with the exact bytes it was parsed from.
///
/// The raw bytes are what a signature was computed over; re-serializing the
/// parsed card would invalidate it.
#[derive(Debug, Clone)]
pub struct FetchedCard {
    pub card: AgentCard,
    pub raw: Bytes,
    pub url: String,
}

/// Timeout-bounded HTTP(S) retrieval of agent cards.
#[derive(Debug, Clone)]
pub struct CardFetcher {
    http: reqwest::Client,
}

impl CardFetcher {
    pub fn new(timeout: Duration, allow_insecure_tls: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(allow_insecure_tls)
            .build()
            .map_err(|e| Scout8Error::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Fetch and parse the card served at `origin` + `path`.
    ///
    /// Connection failures, timeouts and non-2xx responses surface as
    /// [`Scout8Error::Unreachable`]; a body that is not a card surfaces as
    /// [`Scout8Error::Malformed`]. Neither is fatal to batch callers.
    pub async fn fetch(&self, origin: &str, path: &str) -> Result<FetchedCard> {
        let url = join_url(origin, path);
        debug!(url = %url, "Fetching agent card");

        let response = self.http.get(&url).send().await.map_err(|e| {
            Scout8Error::Unreachable { url: url.clone(), reason: root_cause(&e) }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Scout8Error::Unreachable {
                url,
                reason: format!("status {status}"),
            });
        }

        let raw = response.bytes().await.map_err(|e| Scout8Error::Unreachable {
            url: url.clone(),
            reason: root_cause(&e),
        })?;

        let card: AgentCard =
            serde_json::from_slice(&raw).map_err(|e| Scout8Error::Malformed {
                url: url.clone(),
                reason: format!("not a valid agent card: {e}"),
            })?;

        Ok(FetchedCard { card, raw, url })
    }

    /// Opportunistic health probe; any failure reads as unhealthy.
    pub async fn check_health(&self, origin: &str) -> bool {
        let url = join_url(origin, HEALTH_PATH);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %url, error = %root_cause(&e), "Health probe failed");
                false
            }
        }
    }
}

fn join_url(origin: &str, path: &str) -> String {
    format!("{}/{}", origin.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// reqwest wraps the interesting cause (timeout, refused connection) under
/// generic "error sending request" layers; walk down to it for readable
/// per-record reasons.
fn root_cause(error: &reqwest::Error) -> String {
    let mut source: &dyn std::error::Error = error;
    while let Some(next) = source.source() {
        source = next;
    }
    source.to_string()
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::{Json, Router};

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetch_parses_card_and_keeps_raw_bytes() {
        let card = serde_json::json!({"name": "echo", "version": "1.2.3"});
        let origin = serve(Router::new().route(
            "/.well-known/agent.json",
            get(move || async move { Json(card) }),
        ))
        .await;

        let fetcher = CardFetcher::new(Duration::from_secs(2), false).unwrap();
        let fetched = fetcher.fetch(&origin, WELL_KNOWN_CARD_PATH).await.unwrap();

        assert_eq!(fetched.card.name, "echo");
        assert_eq!(fetched.card.version, "1.2.3");
        let reparsed: serde_json::Value = serde_json::from_slice(&fetched.raw).unwrap();
        assert_eq!(reparsed["name"], "echo");
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let origin = serve(
            Router::new()
                .route("/.well-known/agent.json", get(|| async { "not json at all" })),
        )
        .await;

        let fetcher = CardFetcher::new(Duration::from_secs(2), false).unwrap();
        let result = fetcher.fetch(&origin, WELL_KNOWN_CARD_PATH).await;
        assert!(matches!(result, Err(Scout8Error::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_port() {
        // Bind then drop so the port is known closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let fetcher = CardFetcher::new(Duration::from_secs(2), false).unwrap();
        let result = fetcher.fetch(&origin, WELL_KNOWN_CARD_PATH).await;
        assert!(matches!(result, Err(Scout8Error::Unreachable { .. })));
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let origin = serve(Router::new()).await;
        let fetcher = CardFetcher::new(Duration::from_secs(2), false).unwrap();
        let result = fetcher.fetch(&origin, WELL_KNOWN_CARD_PATH).await;
        match result {
            Err(Scout8Error::Unreachable { reason, .. }) => {
                assert!(reason.contains("404"), "reason: {reason}");
            }
            other => panic!("expected Unreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_health_probe() {
        let origin = serve(Router::new().route("/health", get(|| async { "ok" }))).await;
        let fetcher = CardFetcher::new(Duration::from_secs(2), false).unwrap();
        assert!(fetcher.check_health(&origin).await);

        let bare = serve(Router::new()).await;
        assert!(!fetcher.check_health(&bare).await);
    }

    #[test]
    fn test_join_url_slash_handling() {
        assert_eq!(
            join_url("http://a.example/", "/.well-known/agent.json"),
            "http://a.example/.well-known/agent.json"
        );
        assert_eq!(join_url("http://a.example", "health"), "http://a.example/health");
    }
}
