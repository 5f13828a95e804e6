//! kvscript core library
//!
//! Sandboxed execution of short data-query scripts against a key-value
//! store: policy screening, a content-addressed compile cache, and a
//! time-bounded execution boundary behind one facade.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod obs;
pub mod sandbox;
pub mod script;
pub mod service;
pub mod telemetry;

pub use cache::{CacheStats, CompiledScriptCache};
pub use config::{ConfigError, ScriptConfig, MAX_CALL_LEVELS_CEILING};
pub use metrics::METRICS;
pub use sandbox::{
    CapabilitySurface, CompiledUnit, EngineLimits, ErrorKind, ExecutionContext,
    ExecutionCoordinator, ExecutionOutcome, OutcomeError, PolicyValidator, ScriptCompiler,
    ScriptError, ScriptResult,
};
pub use script::{Digest, Script};
pub use service::ScriptExecutionService;
pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
