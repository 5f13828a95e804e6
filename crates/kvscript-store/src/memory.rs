//! In-memory store backend
//!
//! `MemoryStore` models the Redis value types scripts can query (strings,
//! hashes, lists, sets, sorted sets) with lazy TTL expiry. It backs the CLI
//! and the test suites; a networked backend plugs in through the same
//! [`KeyValueStore`] trait.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::pattern::glob_to_regex;
use crate::store_traits::{resolve_range, KeyValueStore, TTL_MISSING, TTL_PERSISTENT};

#[derive(Debug, Clone)]
enum Data {
    String(String),
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
    Set(BTreeSet<String>),
    SortedSet(Vec<(f64, String)>),
}

impl Data {
    fn type_name(&self) -> &'static str {
        match self {
            Data::String(_) => "string",
            Data::Hash(_) => "hash",
            Data::List(_) => "list",
            Data::Set(_) => "set",
            Data::SortedSet(_) => "zset",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Data) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str, expected: &'static str, entry: &Entry) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        actual: entry.data.type_name(),
    }
}

/// Thread-safe in-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a JSON object.
    ///
    /// Each top-level member becomes a key: strings, numbers and booleans
    /// become string values, objects become hashes, arrays become lists.
    pub fn from_json(seed: &Value) -> StoreResult<Self> {
        let object = seed
            .as_object()
            .ok_or_else(|| StoreError::InvalidSeed("top-level value must be an object".into()))?;

        let store = Self::new();
        for (key, value) in object {
            let data = match value {
                Value::Object(fields) => Data::Hash(
                    fields
                        .iter()
                        .map(|(f, v)| (f.clone(), scalar_to_string(v)))
                        .collect(),
                ),
                Value::Array(items) => Data::List(items.iter().map(scalar_to_string).collect()),
                Value::Null => {
                    return Err(StoreError::InvalidSeed(format!("key {key} has a null value")))
                }
                scalar => Data::String(scalar_to_string(scalar)),
            };
            store.lock().insert(key.clone(), Entry::new(data));
        }
        tracing::debug!(keys = object.len(), "seeded memory store");
        Ok(store)
    }

    /// `RPUSH key value...`
    pub fn rpush(&self, key: &str, values: &[&str]) -> StoreResult<usize> {
        let mut entries = self.lock();
        let entry = live_entry_or_insert(&mut entries, key, || Data::List(Vec::new()));
        if let Data::List(list) = &mut entry.data {
            list.extend(values.iter().map(|v| v.to_string()));
            return Ok(list.len());
        }
        Err(wrong_type(key, "list", entry))
    }

    /// `SADD key member...`
    pub fn sadd(&self, key: &str, members: &[&str]) -> StoreResult<usize> {
        let mut entries = self.lock();
        let entry = live_entry_or_insert(&mut entries, key, || Data::Set(BTreeSet::new()));
        if let Data::Set(set) = &mut entry.data {
            return Ok(members.iter().filter(|m| set.insert(m.to_string())).count());
        }
        Err(wrong_type(key, "set", entry))
    }

    /// `ZADD key score member`
    pub fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        let mut entries = self.lock();
        let entry = live_entry_or_insert(&mut entries, key, || Data::SortedSet(Vec::new()));
        if let Data::SortedSet(zset) = &mut entry.data {
            zset.retain(|(_, m)| m != member);
            zset.push((score, member.to_string()));
            zset.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            return Ok(());
        }
        Err(wrong_type(key, "zset", entry))
    }

    /// `EXPIRE key seconds`. Returns `false` when the key does not exist.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.lock();
        match live_entry(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    /// `DEL key`
    pub fn del(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock cannot leave an entry half-written,
        // so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Look up `key`, dropping it first if it has expired.
fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn live_entry_or_insert<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    init: impl FnOnce() -> Data,
) -> &'a mut Entry {
    if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
        entries.remove(key);
    }
    entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(init()))
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.lock();
        match live_entry(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                data: Data::String(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(entry) => Err(wrong_type(key, "string", entry)),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        // SET replaces any existing value and clears its TTL.
        self.lock()
            .insert(key.to_string(), Entry::new(Data::String(value.to_string())));
        Ok(())
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut entries = self.lock();
        match live_entry(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                data: Data::Hash(h),
                ..
            }) => Ok(h.get(field).cloned()),
            Some(entry) => Err(wrong_type(key, "hash", entry)),
        }
    }

    fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        let mut entries = self.lock();
        match live_entry(&mut entries, key) {
            None => Ok(BTreeMap::new()),
            Some(Entry {
                data: Data::Hash(h),
                ..
            }) => Ok(h.clone()),
            Some(entry) => Err(wrong_type(key, "hash", entry)),
        }
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.lock();
        let entry = live_entry_or_insert(&mut entries, key, || Data::Hash(BTreeMap::new()));
        if let Data::Hash(h) = &mut entry.data {
            h.insert(field.to_string(), value.to_string());
            return Ok(());
        }
        Err(wrong_type(key, "hash", entry))
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.lock();
        match live_entry(&mut entries, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                data: Data::Set(s),
                ..
            }) => Ok(s.iter().cloned().collect()),
            Some(entry) => Err(wrong_type(key, "set", entry)),
        }
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut entries = self.lock();
        match live_entry(&mut entries, key) {
            None => Ok(false),
            Some(Entry {
                data: Data::Set(s),
                ..
            }) => Ok(s.contains(member)),
            Some(entry) => Err(wrong_type(key, "set", entry)),
        }
    }

    fn zrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>> {
        let mut entries = self.lock();
        match live_entry(&mut entries, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                data: Data::SortedSet(z),
                ..
            }) => Ok(resolve_range(z.len(), start, end)
                .map(|r| z[r].iter().map(|(_, m)| m.clone()).collect())
                .unwrap_or_default()),
            Some(entry) => Err(wrong_type(key, "zset", entry)),
        }
    }

    fn lrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>> {
        let mut entries = self.lock();
        match live_entry(&mut entries, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                data: Data::List(l),
                ..
            }) => Ok(resolve_range(l.len(), start, end)
                .map(|r| l[r].to_vec())
                .unwrap_or_default()),
            Some(entry) => Err(wrong_type(key, "list", entry)),
        }
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.lock();
        Ok(live_entry(&mut entries, key).is_some())
    }

    fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut entries = self.lock();
        Ok(match live_entry(&mut entries, key) {
            None => TTL_MISSING,
            Some(Entry {
                expires_at: None, ..
            }) => TTL_PERSISTENT,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                // Round up so a key with 900ms left still reports 1.
                remaining.as_millis().div_ceil(1000) as i64
            }
        })
    }

    fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let regex = glob_to_regex(pattern)?;
        let now = Instant::now();
        let entries = self.lock();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && regex.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
