//! Resource subscription bookkeeping, sharded by URI

use std::{
    collections::{hash_map::DefaultHasher, HashMap, HashSet},
    hash::{Hash, Hasher},
    sync::{Mutex, MutexGuard, PoisonError},
};

const SHARD_COUNT: usize = 16;

type Shard = HashMap<String, HashSet<String>>;

/// URI → subscriber ids. A URI with no subscribers has no entry.
#[derive(Debug)]
pub struct SubscriptionTable {
    shards: Vec<Mutex<Shard>>,
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, uri: &str) -> MutexGuard<'_, Shard> {
        let mut hasher = DefaultHasher::new();
        uri.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` when `subscriber` was not already subscribed to `uri`.
    pub fn subscribe(&self, uri: &str, subscriber: &str) -> bool {
        self.shard(uri)
            .entry(uri.to_string())
            .or_default()
            .insert(subscriber.to_string())
    }

    /// Returns `true` when a subscription was removed. Drops the URI entry
    /// together with its last subscriber.
    pub fn unsubscribe(&self, uri: &str, subscriber: &str) -> bool {
        let mut shard = self.shard(uri);
        let Some(subscribers) = shard.get_mut(uri) else {
            return false;
        };

        let removed = subscribers.remove(subscriber);
        if subscribers.is_empty() {
            shard.remove(uri);
        }
        removed
    }

    pub fn has_subscribers(&self, uri: &str) -> bool {
        self.shard(uri)
            .get(uri)
            .is_some_and(|subscribers| !subscribers.is_empty())
    }

    pub fn subscribers(&self, uri: &str) -> Vec<String> {
        let mut subscribers: Vec<String> = self
            .shard(uri)
            .get(uri)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default();
        subscribers.sort();
        subscribers
    }

    /// Number of URIs with at least one subscriber.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every subscription and returns how many URIs were released.
    pub fn clear(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
                let released = shard.len();
                shard.clear();
                released
            })
            .sum()
    }
}
