//! Thinking-signature cache: maps the accumulated text of a thought block
//! to the upstream-issued signature that authenticated it, keyed by a
//! digest of the text so identical thinking content reuses the same
//! signature across requests.
//!
//! Grounded in the streaming/response mappers' `SignatureManager`
//! (`mappers/claude/streaming.rs` in the source repo) but pulled out into
//! its own bounded, background-evicted store per the spec: the teacher's
//! version is a per-stream, unbounded `Option<String>` scratch slot.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MIN_SIGNATURE_LEN: usize = 50;

struct Entry {
    signature: String,
    family: String,
    expires_at: Instant,
}

pub struct SignatureCache {
    entries: Arc<DashMap<[u8; 32], Entry>>,
    ttl: Duration,
    max_entries: usize,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_limits(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            max_entries,
        }
    }

    fn digest(text: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }

    pub fn get(&self, text: &str) -> Option<(String, String)> {
        let key = Self::digest(text);
        let entry = self.entries.get(&key)?;
        if entry.expires_at < Instant::now() {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some((entry.signature.clone(), entry.family.clone()))
    }

    /// Store `(text -> signature, family)`. Signatures shorter than
    /// [`MIN_SIGNATURE_LEN`] are ignored.
    pub fn set(&self, text: &str, signature: &str, family: &str) {
        if signature.len() < MIN_SIGNATURE_LEN {
            return;
        }
        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        let key = Self::digest(text);
        self.entries.insert(
            key,
            Entry {
                signature: signature.to_string(),
                family: family.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn evict_oldest(&self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|e| e.expires_at)
            .map(|e| *e.key())
        {
            self.entries.remove(&oldest_key);
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, v| v.expires_at >= now);
    }

    /// Spawn the periodic background evictor. Call once at startup.
    pub fn spawn_janitor(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEFAULT_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                cache.sweep();
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrip() {
        let cache = SignatureCache::new();
        let sig = "s".repeat(60);
        cache.set("some thought text", &sig, "claude-family");
        let (got_sig, got_family) = cache.get("some thought text").unwrap();
        assert_eq!(got_sig, sig);
        assert_eq!(got_family, "claude-family");
    }

    #[test]
    fn short_signature_rejected() {
        let cache = SignatureCache::new();
        cache.set("text", "short", "family");
        assert!(cache.get("text").is_none());
    }

    #[test]
    fn miss_returns_none() {
        let cache = SignatureCache::new();
        assert!(cache.get("never set").is_none());
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = SignatureCache::with_limits(Duration::from_millis(1), 100);
        let sig = "s".repeat(60);
        cache.set("text", &sig, "family");
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("text").is_none());
    }
}
