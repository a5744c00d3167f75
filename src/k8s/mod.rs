pub mod client;
pub mod types;

pub use client::K8sClient;
pub use types::{
    CandidateResource, ANNOTATION_CARD_PATH, LABEL_AGENT_CLASS, LABEL_AGENT_NAME,
};
