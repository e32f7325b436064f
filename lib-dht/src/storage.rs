//! Local Storage (design §4.4): a capacity- and TTL-bounded key/value store
//! with lazy culling on read, plus a CRDT set-union layer for `append`/`remove`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct StorageEntry {
    value: String,
    inserted_at: Instant,
}

/// LRU-ish, TTL-bounded key/value store. Entries are culled lazily: a stale
/// entry is only actually removed the next time it (or the whole store) is
/// touched, never on a background timer.
pub struct ForgetfulStorage {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, StorageEntry>,
    /// Insertion order, oldest first, for capacity eviction.
    order: Vec<String>,
}

impl ForgetfulStorage {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        ForgetfulStorage { capacity, ttl, entries: HashMap::new(), order: Vec::new() }
    }

    fn is_expired(&self, entry: &StorageEntry) -> bool {
        entry.inserted_at.elapsed() > self.ttl
    }

    /// Remove every entry whose TTL has elapsed. Called opportunistically
    /// from `get`/`set` rather than on a timer.
    fn cull(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
        self.order.retain(|k| self.entries.contains_key(k));
    }

    pub fn set(&mut self, key: String, value: String) {
        self.cull();
        if !self.entries.contains_key(&key) {
            if self.order.len() >= self.capacity {
                let evicted = self.order.remove(0);
                self.entries.remove(&evicted);
            }
            self.order.push(key.clone());
        }
        self.entries.insert(key, StorageEntry { value, inserted_at: Instant::now() });
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        self.cull();
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn contains(&mut self, key: &str) -> bool {
        self.cull();
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.order.retain(|k| k != key);
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn len(&mut self) -> usize {
        self.cull();
        self.entries.len()
    }

    /// All live keys, for republish sweeps (design §2 component 10).
    pub fn keys(&mut self) -> Vec<String> {
        self.cull();
        self.entries.keys().cloned().collect()
    }

    /// `(key, value)` pairs keyed under `inserted_at` age, oldest first, used
    /// by republish maintenance to avoid re-announcing everything every tick.
    pub fn entries_older_than(&mut self, age: Duration) -> Vec<(String, String)> {
        self.cull();
        self.entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() >= age)
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }
}

/// CRDT set-union append/remove layered over a plain last-writer-wins scalar
/// value. `append` and `remove` operate on a JSON array stored as the scalar
/// value's textual encoding; concurrent appends from different peers merge by
/// union, and a `remove` is a tombstone that wins over any `append` replayed
/// after it for the same element (design §4.5, §5 "CRDT set").
pub struct SetStore {
    /// key -> (live elements, tombstoned elements)
    sets: HashMap<String, (Vec<String>, Vec<String>)>,
}

impl SetStore {
    pub fn new() -> Self {
        SetStore { sets: HashMap::new() }
    }

    pub fn append(&mut self, key: &str, element: String) {
        let (live, tombstones) = self.sets.entry(key.to_string()).or_insert_with(|| (Vec::new(), Vec::new()));
        if tombstones.contains(&element) {
            return;
        }
        if !live.contains(&element) {
            live.push(element);
        }
    }

    pub fn remove(&mut self, key: &str, element: String) {
        let (live, tombstones) = self.sets.entry(key.to_string()).or_insert_with(|| (Vec::new(), Vec::new()));
        live.retain(|e| e != &element);
        if !tombstones.contains(&element) {
            tombstones.push(element);
        }
    }

    /// `append` over a whole JSON-decoded list in one call (design §4.3's
    /// `append` semantics): union the incoming elements into the stored set.
    pub fn append_many(&mut self, key: &str, elements: &[String]) {
        for element in elements {
            self.append(key, element.clone());
        }
    }

    /// `remove` over a whole JSON-decoded list in one call: set-difference
    /// the incoming elements out of the stored set.
    pub fn remove_many(&mut self, key: &str, elements: &[String]) {
        for element in elements {
            self.remove(key, element.clone());
        }
    }

    /// All keys currently tracked as set-typed, for key-handoff and
    /// republish sweeps.
    pub fn keys(&self) -> Vec<String> {
        self.sets.keys().cloned().collect()
    }

    /// `getConcat`: the live (non-tombstoned) elements of a set, in
    /// insertion order.
    pub fn get_concat(&self, key: &str) -> Vec<String> {
        self.sets.get(key).map(|(live, _)| live.clone()).unwrap_or_default()
    }

    /// Union two remote replicas of the same set into a local merge result,
    /// used by the crawler's value-reconciliation step when a `find_value`
    /// crawl for a set-typed key returns divergent replicas.
    pub fn merge_remote(&mut self, key: &str, remote_live: &[String], remote_tombstones: &[String]) {
        let (live, tombstones) = self.sets.entry(key.to_string()).or_insert_with(|| (Vec::new(), Vec::new()));
        for t in remote_tombstones {
            if !tombstones.contains(t) {
                tombstones.push(t.clone());
            }
            live.retain(|e| e != t);
        }
        for e in remote_live {
            if !tombstones.contains(e) && !live.contains(e) {
                live.push(e.clone());
            }
        }
    }
}

impl Default for SetStore {
    fn default() -> Self {
        SetStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn set_then_get_round_trips() {
        let mut storage = ForgetfulStorage::new(10, Duration::from_secs(60));
        storage.set("k".into(), "v".into());
        assert_eq!(storage.get("k"), Some("v".to_string()));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut storage = ForgetfulStorage::new(10, Duration::from_millis(10));
        storage.set("k".into(), "v".into());
        sleep(Duration::from_millis(30));
        assert_eq!(storage.get("k"), None);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut storage = ForgetfulStorage::new(2, Duration::from_secs(60));
        storage.set("a".into(), "1".into());
        storage.set("b".into(), "2".into());
        storage.set("c".into(), "3".into());
        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get("a"), None);
        assert_eq!(storage.get("c"), Some("3".to_string()));
    }

    #[test]
    fn append_is_idempotent_under_union() {
        let mut set = SetStore::new();
        set.append("k", "x".into());
        set.append("k", "x".into());
        assert_eq!(set.get_concat("k"), vec!["x".to_string()]);
    }

    #[test]
    fn remove_wins_over_later_append_replay() {
        let mut set = SetStore::new();
        set.append("k", "x".into());
        set.remove("k", "x".into());
        set.append("k", "x".into());
        assert!(set.get_concat("k").is_empty());
    }

    #[test]
    fn append_many_unions_a_whole_json_list_in_one_call() {
        let mut set = SetStore::new();
        set.append_many("t", &["a".to_string(), "b".to_string()]);
        set.append_many("t", &["b".to_string(), "c".to_string()]);
        let mut result = set.get_concat("t");
        result.sort();
        assert_eq!(result, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn remove_many_is_a_set_difference() {
        let mut set = SetStore::new();
        set.append_many("t", &["a".to_string(), "b".to_string(), "c".to_string()]);
        set.remove_many("t", &["b".to_string()]);
        let mut result = set.get_concat("t");
        result.sort();
        assert_eq!(result, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn merge_remote_unions_live_sets() {
        let mut set = SetStore::new();
        set.append("k", "a".into());
        set.merge_remote("k", &["b".to_string()], &[]);
        let mut result = set.get_concat("k");
        result.sort();
        assert_eq!(result, vec!["a".to_string(), "b".to_string()]);
    }
}
