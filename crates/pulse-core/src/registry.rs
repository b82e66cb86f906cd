//! Memory-Bounded Session Registry with LRU Eviction
//!
//! Owns one state bundle per active session, keyed by the xxh3 hash of the
//! session id. Sessions are created and torn down explicitly; when the
//! registry is full the least recently touched session is evicted to make room.

use crate::error::{PulseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use xxhash_rust::xxh3::xxh3_64;

/// Registry key for a session id
#[inline]
pub fn session_key(id: &str) -> u64 {
    xxh3_64(id.as_bytes())
}

/// Configuration for the session registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of live sessions
    pub max_sessions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_sessions: 1024 }
    }
}

/// Metadata for a session entry
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub last_access: Instant,
    pub created_at: Instant,
    /// Lookups through `get_mut`
    pub touches: u64,
}

impl Default for SessionMeta {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            last_access: now,
            created_at: now,
            touches: 0,
        }
    }
}

impl SessionMeta {
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
        self.touches += 1;
    }
}

#[derive(Debug)]
pub struct SessionEntry<S> {
    pub id: String,
    pub session: S,
    pub meta: SessionMeta,
}

/// Statistics about the registry
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub total_evictions: u64,
    pub total_creations: u64,
    pub total_removals: u64,
    pub capacity: usize,
}

/// Memory-bounded session registry with LRU eviction
pub struct SessionRegistry<S> {
    sessions: HashMap<u64, SessionEntry<S>>,
    config: RegistryConfig,
    stats: RegistryStats,
}

impl<S> SessionRegistry<S> {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        let capacity = config.max_sessions.max(1);
        Self {
            sessions: HashMap::with_capacity(capacity.min(4096)),
            stats: RegistryStats {
                capacity,
                ..Default::default()
            },
            config: RegistryConfig {
                max_sessions: capacity,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_sessions: self.sessions.len(),
            ..self.stats.clone()
        }
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.config.max_sessions
    }

    fn entry(&self, id: &str) -> Option<&SessionEntry<S>> {
        self.sessions.get(&session_key(id)).filter(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    /// Read-only lookup; does not count as an access for eviction.
    pub fn get(&self, id: &str) -> Option<&S> {
        self.entry(id).map(|e| &e.session)
    }

    /// Mutable lookup, marking the session as recently used
    pub fn get_mut(&mut self, id: &str) -> Option<&mut S> {
        let entry = self
            .sessions
            .get_mut(&session_key(id))
            .filter(|e| e.id == id)?;
        entry.meta.touch();
        Some(&mut entry.session)
    }

    pub fn get_meta(&self, id: &str) -> Option<&SessionMeta> {
        self.entry(id).map(|e| &e.meta)
    }

    /// Register a new session. Fails if the id is already live; when the
    /// registry is full the least recently used session is evicted and
    /// returned.
    pub fn create(&mut self, id: impl Into<String>, session: S) -> Result<Option<(String, S)>> {
        let id = id.into();
        let key = session_key(&id);
        if self.sessions.contains_key(&key) {
            return Err(PulseError::SessionExists(id));
        }

        let evicted = if self.is_full() { self.evict_one() } else { None };

        self.sessions.insert(
            key,
            SessionEntry {
                id,
                session,
                meta: SessionMeta::default(),
            },
        );
        self.stats.total_creations += 1;

        Ok(evicted)
    }

    /// Tear down a session, handing back its state
    pub fn remove(&mut self, id: &str) -> Result<S> {
        let key = session_key(id);
        match self.sessions.get(&key) {
            Some(e) if e.id == id => {}
            _ => return Err(PulseError::SessionNotFound(id.to_string())),
        }

        let entry = self
            .sessions
            .remove(&key)
            .ok_or_else(|| PulseError::SessionNotFound(id.to_string()))?;
        self.stats.total_removals += 1;
        Ok(entry.session)
    }

    fn evict_one(&mut self) -> Option<(String, S)> {
        let candidate = self
            .sessions
            .iter()
            .min_by_key(|(_, e)| e.meta.last_access)
            .map(|(&k, _)| k)?;

        let entry = self.sessions.remove(&candidate)?;
        self.stats.total_evictions += 1;
        Some((entry.id, entry.session))
    }

    /// Live session ids, in no particular order
    pub fn ids(&self) -> Vec<String> {
        self.sessions.values().map(|e| e.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &S)> {
        self.sessions.values().map(|e| (e.id.as_str(), &e.session))
    }

    /// Remove every session, handing them back for teardown
    pub fn drain(&mut self) -> Vec<(String, S)> {
        self.stats.total_removals += self.sessions.len() as u64;
        self.sessions.drain().map(|(_, e)| (e.id, e.session)).collect()
    }
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_remove() {
        let mut registry: SessionRegistry<u32> = SessionRegistry::new();
        assert!(registry.create("checkout", 1).unwrap().is_none());
        registry.create("search", 2).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("checkout"));
        assert_eq!(registry.get("search"), Some(&2));

        assert_eq!(registry.remove("checkout").unwrap(), 1);
        assert!(!registry.contains("checkout"));
        assert!(matches!(
            registry.remove("checkout"),
            Err(PulseError::SessionNotFound(_))
        ));
        assert_eq!(registry.stats().total_removals, 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry: SessionRegistry<&str> = SessionRegistry::new();
        registry.create("a", "first").unwrap();
        let err = registry.create("a", "second").unwrap_err();
        assert!(matches!(err, PulseError::SessionExists(ref id) if id == "a"));
        assert_eq!(registry.get("a"), Some(&"first"));
    }

    #[test]
    fn test_lru_eviction() {
        let mut registry: SessionRegistry<u32> =
            SessionRegistry::with_config(RegistryConfig { max_sessions: 3 });
        registry.create("a", 1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        registry.create("b", 2).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        registry.create("c", 3).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        // "a" becomes the most recently used
        *registry.get_mut("a").unwrap() += 10;

        let evicted = registry.create("d", 4).unwrap();
        assert_eq!(evicted, Some(("b".to_string(), 2)));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("a"), Some(&11));
        assert_eq!(registry.stats().total_evictions, 1);
    }

    #[test]
    fn test_drain() {
        let mut registry: SessionRegistry<u8> = SessionRegistry::new();
        registry.create("x", 1).unwrap();
        registry.create("y", 2).unwrap();
        let mut drained = registry.drain();
        drained.sort();
        assert_eq!(drained, vec![("x".to_string(), 1), ("y".to_string(), 2)]);
        assert!(registry.is_empty());
    }
}
