pub mod fetcher;
pub mod types;

pub use fetcher::{CardFetcher, FetchedCard, HEALTH_PATH, WELL_KNOWN_CARD_PATH};
pub use types::{canonical_payload, AgentCard, AgentCardSignature, AgentSkill};
