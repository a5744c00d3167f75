pub mod keys;
pub mod signer;
pub mod sources;
pub mod store;
pub mod verifier;

pub use keys::{KeyEntry, KeySet};
pub use signer::CardSigner;
pub use store::{RejectedKey, TrustStore};
pub use verifier::{SignatureVerifier, VerificationStatus};
