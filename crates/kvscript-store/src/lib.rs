//! kvscript-store: key-value store layer for kvscript
//!
//! The script engine reaches external state only through the
//! [`KeyValueStore`] trait defined here.
//!
//! ## Key Components
//!
//! - `KeyValueStore`: object-safe, `Send + Sync` store interface
//! - `MemoryStore`: in-memory backend with Redis value types and TTLs
//! - `glob_to_regex`: Redis `KEYS` pattern matching

mod error;
pub mod memory;
pub mod pattern;
pub mod store_traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pattern::glob_to_regex;
pub use store_traits::{resolve_range, KeyValueStore, TTL_MISSING, TTL_PERSISTENT};
