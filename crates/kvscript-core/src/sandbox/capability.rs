//! Capability surface: the only window a script has onto the store.
//!
//! Each script-visible function maps onto exactly one [`KeyValueStore`] call
//! and only exchanges strings, numbers, booleans, arrays and maps with the
//! script. Nothing here checks policy; that happened before compilation.

use std::collections::BTreeMap;
use std::sync::Arc;

use kvscript_store::{KeyValueStore, StoreError, StoreResult};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position, INT};

type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Script-visible function names, in registration order.
pub const SURFACE_FUNCTIONS: &[&str] = &[
    "get", "set", "hget", "hgetall", "hset", "smembers", "sismember", "zrange", "lrange",
    "exists", "ttl", "keys",
];

/// Per-call handle onto the store. Cheap to construct and clone.
#[derive(Clone)]
pub struct CapabilitySurface {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for CapabilitySurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySurface").finish_non_exhaustive()
    }
}

impl CapabilitySurface {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.store.get(key)
    }

    pub fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.store.set(key, value)
    }

    pub fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.store.hget(key, field)
    }

    pub fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        self.store.hgetall(key)
    }

    pub fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.store.hset(key, field, value)
    }

    pub fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.store.smembers(key)
    }

    pub fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.store.sismember(key, member)
    }

    pub fn zrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>> {
        self.store.zrange(key, start, end)
    }

    pub fn lrange(&self, key: &str, start: i64, end: i64) -> StoreResult<Vec<String>> {
        self.store.lrange(key, start, end)
    }

    pub fn exists(&self, key: &str) -> StoreResult<bool> {
        self.store.exists(key)
    }

    pub fn ttl(&self, key: &str) -> StoreResult<i64> {
        self.store.ttl(key)
    }

    pub fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.store.keys(pattern)
    }

    /// Register every surface operation as a global function on `engine`.
    pub fn install(self, engine: &mut Engine) {
        let surface = Arc::new(self);

        let s = surface.clone();
        engine.register_fn("get", move |key: ImmutableString| -> FnResult<Dynamic> {
            s.get(&key).map(optional).map_err(fault)
        });

        let s = surface.clone();
        engine.register_fn(
            "set",
            move |key: ImmutableString, value: Dynamic| -> FnResult<()> {
                s.set(&key, &value.to_string()).map_err(fault)
            },
        );

        let s = surface.clone();
        engine.register_fn(
            "hget",
            move |key: ImmutableString, field: ImmutableString| -> FnResult<Dynamic> {
                s.hget(&key, &field).map(optional).map_err(fault)
            },
        );

        let s = surface.clone();
        engine.register_fn("hgetall", move |key: ImmutableString| -> FnResult<Map> {
            s.hgetall(&key)
                .map(|fields| {
                    fields
                        .into_iter()
                        .map(|(f, v)| (f.into(), Dynamic::from(v)))
                        .collect()
                })
                .map_err(fault)
        });

        let s = surface.clone();
        engine.register_fn(
            "hset",
            move |key: ImmutableString, field: ImmutableString, value: Dynamic| -> FnResult<()> {
                s.hset(&key, &field, &value.to_string()).map_err(fault)
            },
        );

        let s = surface.clone();
        engine.register_fn("smembers", move |key: ImmutableString| -> FnResult<Array> {
            s.smembers(&key).map(array).map_err(fault)
        });

        let s = surface.clone();
        engine.register_fn(
            "sismember",
            move |key: ImmutableString, member: ImmutableString| -> FnResult<bool> {
                s.sismember(&key, &member).map_err(fault)
            },
        );

        let s = surface.clone();
        engine.register_fn(
            "zrange",
            move |key: ImmutableString, start: INT, end: INT| -> FnResult<Array> {
                s.zrange(&key, start, end).map(array).map_err(fault)
            },
        );

        let s = surface.clone();
        engine.register_fn(
            "lrange",
            move |key: ImmutableString, start: INT, end: INT| -> FnResult<Array> {
                s.lrange(&key, start, end).map(array).map_err(fault)
            },
        );

        let s = surface.clone();
        engine.register_fn("exists", move |key: ImmutableString| -> FnResult<bool> {
            s.exists(&key).map_err(fault)
        });

        let s = surface.clone();
        engine.register_fn("ttl", move |key: ImmutableString| -> FnResult<INT> {
            s.ttl(&key).map_err(fault)
        });

        let s = surface;
        engine.register_fn("keys", move |pattern: ImmutableString| -> FnResult<Array> {
            s.keys(&pattern).map(array).map_err(fault)
        });
    }
}

fn optional(value: Option<String>) -> Dynamic {
    value.map(Dynamic::from).unwrap_or(Dynamic::UNIT)
}

fn array(values: Vec<String>) -> Array {
    values.into_iter().map(Dynamic::from).collect()
}

/// Store errors surface in the script as ordinary runtime errors.
fn fault(err: StoreError) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(err.to_string()),
        Position::NONE,
    ))
}
