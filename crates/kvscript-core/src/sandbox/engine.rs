//! Restricted Rhai engine construction.
//!
//! Engines here have no module resolution, no `eval`, and only the Rhai
//! standard package (pure data manipulation). Host access is added solely by
//! [`CapabilitySurface::install`](super::CapabilitySurface::install).
//!
//! The standard package is built once and shared, so a fresh engine per call
//! costs a handful of registrations rather than a full library build.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, EvalAltResult, Module, Shared, AST};
use serde::{Deserialize, Serialize};

use crate::script::{Digest, Script};

use super::error::{ScriptError, ScriptResult};

/// Interpreter limits applied to every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineLimits {
    /// Maximum operations per run (0 = unlimited).
    pub max_operations: u64,
    /// Maximum function call nesting.
    pub max_call_levels: usize,
    /// Maximum string length in bytes, string literals included.
    pub max_string_size: usize,
    /// Maximum number of array elements, nested arrays counted.
    pub max_array_size: usize,
    /// Maximum number of object map properties, nested maps counted.
    pub max_map_size: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
            max_string_size: 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
        }
    }
}

fn standard_library() -> Shared<Module> {
    static STDLIB: OnceLock<Shared<Module>> = OnceLock::new();
    STDLIB
        .get_or_init(|| StandardPackage::new().as_shared_module())
        .clone()
}

/// Build an engine with no ambient host access.
pub fn restricted_engine(limits: &EngineLimits) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(standard_library());
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.set_max_call_levels(limits.max_call_levels);
    // Size caps are never unlimited (Rhai reads 0 as unlimited).
    engine.set_max_string_size(limits.max_string_size.max(1));
    engine.set_max_array_size(limits.max_array_size.max(1));
    engine.set_max_map_size(limits.max_map_size.max(1));
    if limits.max_operations > 0 {
        engine.set_max_operations(limits.max_operations);
    }
    engine.on_print(|text| tracing::debug!(target: "kvscript::script", "{text}"));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(
            target: "kvscript::script",
            source = source.unwrap_or("script"),
            position = %pos,
            "{text}"
        )
    });
    engine
}

/// Terminate the running script at its next operation once `cancel` is set.
pub fn install_cancellation(engine: &mut Engine, cancel: Arc<AtomicBool>) {
    engine.on_progress(move |_ops| {
        if cancel.load(Ordering::Relaxed) {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });
}

/// A parsed script, ready to be bound to a fresh execution context.
///
/// Holds only the AST: no scope, no engine, no store handle.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    digest: Digest,
    source_len: usize,
    ast: AST,
}

impl CompiledUnit {
    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn source_len(&self) -> usize {
        self.source_len
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }
}

/// Parses script text into [`CompiledUnit`]s.
pub struct ScriptCompiler {
    engine: Engine,
}

impl std::fmt::Debug for ScriptCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCompiler").finish_non_exhaustive()
    }
}

impl ScriptCompiler {
    pub fn new(limits: &EngineLimits) -> Self {
        Self {
            engine: restricted_engine(limits),
        }
    }

    pub fn compile(&self, script: &Script) -> ScriptResult<CompiledUnit> {
        let ast = self
            .engine
            .compile(script.text())
            .map_err(|e| ScriptError::Compile(e.to_string()))?;
        tracing::debug!(digest = %script.digest().short(), len = script.len(), "script compiled");
        Ok(CompiledUnit {
            digest: script.digest(),
            source_len: script.len(),
            ast,
        })
    }
}

impl Default for ScriptCompiler {
    fn default() -> Self {
        Self::new(&EngineLimits::default())
    }
}

/// Convert a script's return value into JSON.
pub fn dynamic_to_json(value: &Dynamic) -> ScriptResult<serde_json::Value> {
    rhai::serde::from_dynamic::<serde_json::Value>(value).map_err(|e| {
        ScriptError::Runtime(format!(
            "script returned a non-serializable {}: {e}",
            value.type_name()
        ))
    })
}

/// Map an evaluation failure onto the error taxonomy.
///
/// `ErrorTerminated` only happens when the cancellation hook fires, which in
/// turn only happens after the caller has given up on the run.
pub fn classify_eval_error(err: &EvalAltResult, limit_ms: u64) -> ScriptError {
    match err {
        EvalAltResult::ErrorTerminated(..) => ScriptError::Timeout { limit_ms },
        EvalAltResult::ErrorDataTooLarge(what, _) => {
            ScriptError::Runtime(format!("script exceeded a data size limit: {what}"))
        }
        EvalAltResult::ErrorRuntime(value, _) => ScriptError::Runtime(value.to_string()),
        other => ScriptError::Runtime(other.to_string()),
    }
}
