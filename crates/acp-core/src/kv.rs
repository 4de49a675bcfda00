//! Key-value / sorted-set capability contract
//!
//! Reports and sessions persist through [`KeyValueStore`]. The contract is
//! what a Redis-style service offers: string values with optional expiry,
//! plus sorted sets ranged by descending score.

use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Persistent store capability
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value`, replacing any previous value and expiry
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Add or re-score a sorted-set member
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// Remove a sorted-set member, returning whether it was present
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Members ordered by descending score, skipping `offset`, at most `limit`
    async fn zrevrange(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => self.ordered.remove(&(score, member.to_string())),
            None => false,
        }
    }
}

/// In-process [`KeyValueStore`]
///
/// Expiry is checked on read: an expired value is removed by the `get`
/// that observes it. [`MemoryStore::purge_expired`] is the explicit sweep
/// for hosts that want bounded memory without reads.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, Entry>,
    sets: DashMap<String, SortedSet>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired value, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.values.len();
        self.values.retain(|_, entry| !entry.is_expired(now));
        before - self.values.len()
    }

    /// Live and not-yet-swept values
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        match self.values.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.values.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        // A window past what `Instant` can represent never expires
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.values.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.values.remove(key).is_some())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.sets.entry(key.to_string()).or_default().insert(member, score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.sets.get_mut(key).is_some_and(|mut set| set.remove(member)))
    }

    async fn zrevrange(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<String>, StoreError> {
        let Some(set) = self.sets.get(key) else {
            return Ok(Vec::new());
        };
        Ok(set
            .ordered
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect())
    }
}
