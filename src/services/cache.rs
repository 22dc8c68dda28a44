use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

/// Conventional key prefixes.
pub mod keys {
    /// Descriptor mirror for fast status/stream lookups
    pub fn file(id: &str) -> String {
        format!("file:{}", id)
    }

    /// Decompressed bytes of small compressed blobs (range-request cache)
    pub fn content(id: &str) -> String {
        format!("content:{}", id)
    }

    /// In-flight chunked-upload session
    pub fn chunk_upload(id: &str) -> String {
        format!("chunk_upload:{}", id)
    }

    /// Processing job mirror
    pub fn processing_job(id: &str) -> String {
        format!("processing_job:{}", id)
    }

    /// Fast-polled processing status, keyed by file id
    pub fn processing(id: &str) -> String {
        format!("processing:{}", id)
    }

    pub const CHUNK_UPLOAD_PREFIX: &str = "chunk_upload:";
}

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process key/value store with per-key TTL, plus an ordered set of file
/// IDs scored by expiry epoch seconds (the sweeper's work queue).
///
/// Nothing here survives a restart. Losing it costs in-flight upload
/// sessions (clients restart the upload) and cached mirrors (reads fall
/// back to the metadata store).
pub struct EphemeralCache {
    entries: DashMap<String, Entry>,
    expiry_scores: DashMap<String, i64>,
    expiry_index: Mutex<BTreeSet<(i64, String)>>,
}

impl EphemeralCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            expiry_scores: DashMap::new(),
            expiry_index: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        self.entries.insert(
            key.to_string(),
            Entry {
                value: serde_json::to_string(value)?,
                expires_at,
            },
        );
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Utc::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        serde_json::from_str(&entry.value).ok()
    }

    pub fn del(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Batched removal, the pipelined-delete analogue.
    pub fn del_many<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.entries.remove(key.as_ref());
        }
    }

    /// Live keys under a prefix (expired entries are skipped, not evicted).
    pub fn list_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().expires_at > now)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Drop entries whose TTL has lapsed; returns how many were evicted.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Add (or rescore) a member of the expiry-ordered file set.
    pub fn zadd(&self, score: i64, member: &str) {
        let mut index = self.expiry_index.lock().expect("expiry index poisoned");
        if let Some(old) = self.expiry_scores.insert(member.to_string(), score) {
            index.remove(&(old, member.to_string()));
        }
        index.insert((score, member.to_string()));
    }

    pub fn zrem(&self, member: &str) {
        let mut index = self.expiry_index.lock().expect("expiry index poisoned");
        if let Some((_, old)) = self.expiry_scores.remove(member) {
            index.remove(&(old, member.to_string()));
        }
    }

    /// Members with score <= max, ascending.
    pub fn zrange_up_to(&self, max_score: i64) -> Vec<String> {
        let index = self.expiry_index.lock().expect("expiry index poisoned");
        index
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .map(|(_, member)| member.clone())
            .collect()
    }
}

impl Default for EphemeralCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Payload {
        name: String,
        count: u32,
    }

    #[test]
    fn test_set_get_roundtrip() {
        let cache = EphemeralCache::new();
        let payload = Payload {
            name: "hello".to_string(),
            count: 3,
        };
        cache
            .set("file:abc", &payload, Duration::from_secs(60))
            .unwrap();
        assert_eq!(cache.get::<Payload>("file:abc"), Some(payload));
        assert_eq!(cache.get::<Payload>("file:missing"), None);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = EphemeralCache::new();
        cache
            .set("short", &"gone".to_string(), Duration::from_secs(0))
            .unwrap();
        assert_eq!(cache.get::<String>("short"), None);
    }

    #[test]
    fn test_del_and_prefix_listing() {
        let cache = EphemeralCache::new();
        cache
            .set("chunk_upload:a", &1u32, Duration::from_secs(60))
            .unwrap();
        cache
            .set("chunk_upload:b", &2u32, Duration::from_secs(60))
            .unwrap();
        cache.set("file:c", &3u32, Duration::from_secs(60)).unwrap();

        let mut listed = cache.list_prefix("chunk_upload:");
        listed.sort();
        assert_eq!(listed, vec!["chunk_upload:a", "chunk_upload:b"]);

        cache.del("chunk_upload:a");
        assert_eq!(cache.list_prefix("chunk_upload:").len(), 1);
    }

    #[test]
    fn test_ordered_expiry_set() {
        let cache = EphemeralCache::new();
        cache.zadd(100, "early");
        cache.zadd(200, "late");
        cache.zadd(150, "middle");

        assert_eq!(cache.zrange_up_to(150), vec!["early", "middle"]);

        // Rescoring moves a member
        cache.zadd(500, "early");
        assert_eq!(cache.zrange_up_to(150), vec!["middle"]);

        cache.zrem("middle");
        assert!(cache.zrange_up_to(300).is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = EphemeralCache::new();
        cache
            .set("dead", &1u32, Duration::from_secs(0))
            .unwrap();
        cache
            .set("alive", &2u32, Duration::from_secs(60))
            .unwrap();
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get::<u32>("alive"), Some(2));
    }
}
