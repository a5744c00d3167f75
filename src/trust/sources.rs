//! Trusted key-set sources, tried in configuration order.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::trust::keys::KeySet;
use crate::{Result, Scout8Error};

/// Where a trusted key set comes from. Resolution order is the order the
/// sources appear in the policy: inline JSON, then a local file, then a URL.
#[derive(Debug, Clone)]
pub enum KeySetSource {
    Inline(String),
    File(PathBuf),
    Url(String),
}

/// Outcome of trying one source.
#[derive(Debug)]
pub enum SourceOutcome {
    Resolved(KeySet),
    /// The source cannot apply right now (e.g. the file does not exist);
    /// resolution moves on to the next source.
    NotApplicable(String),
    Unreachable(String),
}

impl KeySetSource {
    pub async fn load(&self, http: &reqwest::Client) -> SourceOutcome {
        match self {
            KeySetSource::Inline(json) => match serde_json::from_str(json) {
                Ok(set) => SourceOutcome::Resolved(set),
                Err(e) => SourceOutcome::Unreachable(format!("inline key set is not valid: {e}")),
            },
            KeySetSource::File(path) => {
                if !path.exists() {
                    return SourceOutcome::NotApplicable(format!(
                        "key file {} does not exist",
                        path.display()
                    ));
                }
                match std::fs::read_to_string(path) {
                    Ok(text) => match serde_json::from_str(&text) {
                        Ok(set) => SourceOutcome::Resolved(set),
                        Err(e) => SourceOutcome::Unreachable(format!(
                            "key file {} is not a key set: {e}",
                            path.display()
                        )),
                    },
                    Err(e) => SourceOutcome::Unreachable(format!(
                        "failed to read {}: {e}",
                        path.display()
                    )),
                }
            }
            KeySetSource::Url(url) => match fetch_key_set(http, url).await {
                Ok(set) => SourceOutcome::Resolved(set),
                Err(e) => SourceOutcome::Unreachable(e.to_string()),
            },
        }
    }
}

/// Fetch an RFC 7517 key-set document from a URL.
pub async fn fetch_key_set(http: &reqwest::Client, url: &str) -> Result<KeySet> {
    debug!(url = %url, "Fetching key set");
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| Scout8Error::KeySourceError(format!("{url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Scout8Error::KeySourceError(format!("{url}: status {status}")));
    }
    response
        .json()
        .await
        .map_err(|e| Scout8Error::KeySourceError(format!("{url}: not a key set: {e}")))
}

/// Resolve the first applicable source into a key set.
///
/// `NotApplicable` outcomes fall through to the next source; an applicable
/// source that fails to load is an error, since silently skipping configured
/// trust material would widen the trust surface.
pub async fn resolve_first(
    sources: &[KeySetSource],
    http: &reqwest::Client,
) -> Result<Option<KeySet>> {
    for source in sources {
        match source.load(http).await {
            SourceOutcome::Resolved(set) => {
                debug!(source = ?source, keys = set.len(), "Resolved trusted key set");
                return Ok(Some(set));
            }
            SourceOutcome::NotApplicable(reason) => {
                warn!(source = ?source, reason = %reason, "Key source not applicable, trying next");
            }
            SourceOutcome::Unreachable(reason) => {
                return Err(Scout8Error::KeySourceError(reason));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::keys::generate_ed25519;

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn test_inline_source() {
        let set = KeySet { keys: vec![generate_ed25519("a").unwrap().public_jwk] };
        let source = KeySetSource::Inline(serde_json::to_string(&set).unwrap());
        match source.load(&client()).await {
            SourceOutcome::Resolved(loaded) => assert_eq!(loaded, set),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inline_source_invalid_json_is_fatal() {
        let source = KeySetSource::Inline("{not json".to_string());
        assert!(matches!(source.load(&client()).await, SourceOutcome::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_missing_file_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let missing = KeySetSource::File(dir.path().join("absent.json"));
        assert!(matches!(missing.load(&client()).await, SourceOutcome::NotApplicable(_)));

        let set = KeySet { keys: vec![generate_ed25519("b").unwrap().public_jwk] };
        let path = dir.path().join("jwks.json");
        std::fs::write(&path, serde_json::to_string(&set).unwrap()).unwrap();

        let resolved = resolve_first(
            &[KeySetSource::File(dir.path().join("absent.json")), KeySetSource::File(path)],
            &client(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(resolved, set);
    }

    #[tokio::test]
    async fn test_no_sources_resolves_none() {
        assert!(resolve_first(&[], &client()).await.unwrap().is_none());
    }
}
