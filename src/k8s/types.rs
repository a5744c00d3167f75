use k8s_openapi::api::core::v1::Service;
use serde::{Deserialize, Serialize};

use crate::card::WELL_KNOWN_CARD_PATH;

/// Required labels marking a Service as an agent candidate.
pub const LABEL_AGENT_CLASS: &str = "scout8.io/agent-class";
pub const LABEL_AGENT_NAME: &str = "scout8.io/agent-name";

/// Optional annotation overriding the card endpoint path.
pub const ANNOTATION_CARD_PATH: &str = "scout8.io/card-path";

/// Label selector matching resources that carry both required labels.
pub const AGENT_LABEL_SELECTOR: &str = "scout8.io/agent-class,scout8.io/agent-name";

/// A cluster resource that advertises an agent. Read per discovery call,
/// never owned or persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResource {
    pub namespace: String,
    pub name: String,
    pub agent_class: String,
    pub agent_name: String,
    /// Card endpoint path, annotated or defaulted.
    pub card_path: String,
    /// Resolved serving origin, when one exists.
    pub address: Option<String>,
}

impl CandidateResource {
    /// Extract candidate identity from a labeled Service. Returns `None`
    /// when either required label is missing (the selector should prevent
    /// that, but listings are not trusted blindly).
    pub fn from_service(service: &Service) -> Option<Self> {
        let metadata = &service.metadata;
        let labels = metadata.labels.as_ref()?;
        let agent_class = labels.get(LABEL_AGENT_CLASS)?.clone();
        let agent_name = labels.get(LABEL_AGENT_NAME)?.clone();

        let card_path = metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_CARD_PATH))
            .cloned()
            .unwrap_or_else(|| WELL_KNOWN_CARD_PATH.to_string());

        Some(Self {
            namespace: metadata.namespace.clone().unwrap_or_default(),
            name: metadata.name.clone().unwrap_or_default(),
            agent_class,
            agent_name,
            card_path,
            address: None,
        })
    }

    /// First declared service port, when any.
    pub fn service_port(service: &Service) -> Option<i32> {
        service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| ports.first())
            .map(|p| p.port)
    }
}
