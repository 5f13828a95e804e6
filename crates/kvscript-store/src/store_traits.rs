//! Store trait definitions for kvscript
//!
//! `KeyValueStore` is the only seam between the script engine and external
//! state. Its operation set is deliberately small and mirrors the Redis
//! read/write commands a data-query script needs. Implementations must be
//! safe for concurrent use; pooling, if any, lives behind the trait.

use std::collections::BTreeMap;

use crate::error::StoreResult;

/// Sentinel returned by [`KeyValueStore::ttl`] when the key does not exist.
pub const TTL_MISSING: i64 = -2;

/// Sentinel returned by [`KeyValueStore::ttl`] when the key has no expiry.
pub const TTL_PERSISTENT: i64 = -1;

/// Backend-agnostic key-value store.
///
/// Every method maps onto exactly one store command. Values are strings;
/// structured values (hashes, lists, sets, sorted sets) are addressed by key.
///
/// Range operations (`lrange`, `zrange`) use Redis index rules: `start` and
/// `end` are inclusive and negative indices count from the end.
pub trait KeyValueStore: Send + Sync {
    /// `GET key`
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `SET key value`
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// `HGET key field`
    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// `HGETALL key`
    fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>>;

    /// `HSET key field value`
    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// `SMEMBERS key`, returned in lexicographic order.
    fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// `SISMEMBER key member`
    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// `ZRANGE key start end`, ordered by score then member.
    fn zrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>>;

    /// `LRANGE key start end`
    fn lrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>>;

    /// `EXISTS key`
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// `TTL key`: remaining seconds, [`TTL_PERSISTENT`] or [`TTL_MISSING`].
    fn ttl(&self, key: &str) -> StoreResult<i64>;

    /// `KEYS pattern` with glob syntax (`*`, `?`, `[...]`, `\` escapes).
    fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;
}

/// Resolve an inclusive Redis-style `[start, end]` range against `len`.
///
/// Returns `None` when the range selects nothing.
pub fn resolve_range(len: usize, start: i64, end: i64) -> Option<std::ops::Range<usize>> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len {
        return None;
    }
    Some(start as usize..(end + 1) as usize)
}
