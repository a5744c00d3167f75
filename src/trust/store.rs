//! Process-wide shared key set with multi-writer merge.

use std::sync::RwLock;

use serde::Serialize;
use tracing::{info, warn};

use crate::trust::keys::{KeyEntry, KeySet};

/// An incoming entry the store refused, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedKey {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    pub reason: String,
}

/// Shared collection of public verification keys.
///
/// Reads take point-in-time snapshots and never block each other; `merge`
/// and `put` serialize through the write lock so concurrent writers cannot
/// corrupt the backing set. Merge is idempotent and commutative on `kid`;
/// a `kid` collision is resolved last-call-wins, so under adverse ordering
/// of concurrent merges an older entry can overwrite a newer one — callers
/// rotating keys should re-merge after a conflict window.
#[derive(Debug, Default)]
pub struct TrustStore {
    keys: RwLock<KeySet>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(initial: KeySet) -> Self {
        Self { keys: RwLock::new(initial) }
    }

    /// Snapshot of the current key set.
    pub fn get(&self) -> KeySet {
        self.keys.read().expect("trust store lock poisoned").clone()
    }

    /// Merge `incoming` into the store: replace in place on `kid` match,
    /// append otherwise. Entries failing structural validation are rejected
    /// individually; valid entries still apply and stored entries are never
    /// touched by a rejection.
    pub fn merge(&self, incoming: KeySet) -> (KeySet, Vec<RejectedKey>) {
        let mut rejected = Vec::new();
        let mut guard = self.keys.write().expect("trust store lock poisoned");

        for (index, entry) in incoming.keys.into_iter().enumerate() {
            let outcome = entry.validate().map(|kid| kid.to_string());
            match outcome {
                Ok(kid) => {
                    apply_entry(&mut guard, entry);
                    info!(kid = %kid, "Merged verification key");
                }
                Err(reason) => {
                    warn!(index, reason = %reason, "Rejected incoming key entry");
                    rejected.push(RejectedKey { index, kid: entry.kid.clone(), reason });
                }
            }
        }

        (guard.clone(), rejected)
    }

    /// Unconditionally replace the whole set.
    pub fn put(&self, replacement: KeySet) {
        let mut guard = self.keys.write().expect("trust store lock poisoned");
        *guard = replacement;
    }

    pub fn len(&self) -> usize {
        self.keys.read().expect("trust store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply_entry(set: &mut KeySet, entry: KeyEntry) {
    match set.keys.iter_mut().find(|k| k.kid == entry.kid) {
        Some(existing) => *existing = entry,
        None => set.keys.push(entry),
    }
}
