//! Execution boundary: one compiled unit per call, on its own worker, under
//! a wall-clock budget.
//!
//! The worker is a `spawn_blocking` task racing a `tokio::time::timeout`.
//! When the timer wins, the caller gets a `Timeout` outcome immediately and
//! the worker's cancellation flag is raised; the engine's progress hook then
//! stops the script at its next operation. A worker stuck inside a single
//! store call cannot be interrupted and keeps its thread until that call
//! returns. Its result is discarded.
//!
//! Store writes performed before a timeout or fault are not rolled back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::{Dynamic, Scope};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::capability::CapabilitySurface;
use super::engine::{
    classify_eval_error, dynamic_to_json, install_cancellation, restricted_engine, CompiledUnit,
    EngineLimits,
};
use super::error::{ErrorKind, ScriptError, ScriptResult};

/// Name of the script-visible dry-run constant.
pub const DRY_RUN_VAR: &str = "dry_run";

/// Per-call state: the capability surface plus script variables.
///
/// Consumed by [`ExecutionCoordinator::run`]; nothing survives the call.
#[derive(Debug)]
pub struct ExecutionContext {
    surface: CapabilitySurface,
    scope: Scope<'static>,
    dry_run: bool,
    execution_id: Uuid,
}

impl ExecutionContext {
    pub fn new(surface: CapabilitySurface, dry_run: bool) -> Self {
        let mut scope = Scope::new();
        scope.push_constant(DRY_RUN_VAR, dry_run);
        Self {
            surface,
            scope,
            dry_run,
            execution_id: Uuid::new_v4(),
        }
    }

    /// Bind an extra script variable.
    pub fn with_variable(mut self, name: &str, value: impl Into<Dynamic>) -> Self {
        self.scope.push_dynamic(name.to_string(), value.into());
        self
    }

    pub fn with_execution_id(mut self, execution_id: Uuid) -> Self {
        self.execution_id = execution_id;
        self
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }
}

/// Error half of an [`ExecutionOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ScriptError> for OutcomeError {
    fn from(err: &ScriptError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// The typed result of one execution. Never a panic, never a transport error.
///
/// Exactly one of `value` / `error` is set. `elapsed_ms` is always filled.
/// `dry_run` is echoed metadata only: mutating calls still reach the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub value: Option<serde_json::Value>,
    pub error: Option<OutcomeError>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub script: String,
    pub dry_run: bool,
    pub execution_id: Uuid,
}

impl ExecutionOutcome {
    pub fn success(value: serde_json::Value, dry_run: bool, execution_id: Uuid) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            elapsed_ms: 0,
            script: String::new(),
            dry_run,
            execution_id,
        }
    }

    pub fn failure(err: &ScriptError, dry_run: bool, execution_id: Uuid) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(err.into()),
            elapsed_ms: 0,
            script: String::new(),
            dry_run,
            execution_id,
        }
    }

    pub fn from_result(
        result: ScriptResult<serde_json::Value>,
        dry_run: bool,
        execution_id: Uuid,
    ) -> Self {
        match result {
            Ok(value) => Self::success(value, dry_run, execution_id),
            Err(err) => Self::failure(&err, dry_run, execution_id),
        }
    }

    /// Record wall-clock time, rounded up to whole milliseconds.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_nanos().div_ceil(1_000_000) as u64;
        self
    }

    pub fn with_script(mut self, script: &str) -> Self {
        self.script = script.to_string();
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// Runs compiled units under a deadline.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCoordinator {
    limits: EngineLimits,
}

impl ExecutionCoordinator {
    pub fn new(limits: EngineLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    /// Execute `unit` with `context` bound, giving up after `timeout`.
    pub async fn run(
        &self,
        unit: Arc<CompiledUnit>,
        context: ExecutionContext,
        timeout: Duration,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let limit_ms = timeout.as_millis() as u64;
        let dry_run = context.dry_run;
        let execution_id = context.execution_id;
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = {
            let limits = self.limits;
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || run_unit(&unit, context, &limits, cancel, limit_ms))
        };

        let result = match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ScriptError::Runtime(format!(
                "script worker failed: {join_err}"
            ))),
            Err(_elapsed) => {
                cancel.store(true, Ordering::Relaxed);
                crate::obs::emit_timeout(execution_id, limit_ms);
                Err(ScriptError::Timeout { limit_ms })
            }
        };

        ExecutionOutcome::from_result(result, dry_run, execution_id).with_elapsed(started.elapsed())
    }
}

/// Worker body: fresh engine, fresh scope, the cached AST.
fn run_unit(
    unit: &CompiledUnit,
    context: ExecutionContext,
    limits: &EngineLimits,
    cancel: Arc<AtomicBool>,
    limit_ms: u64,
) -> ScriptResult<serde_json::Value> {
    let ExecutionContext {
        surface, mut scope, ..
    } = context;

    let mut engine = restricted_engine(limits);
    install_cancellation(&mut engine, cancel);
    surface.install(&mut engine);

    debug!(digest = %unit.digest().short(), "running compiled unit");
    let value = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, unit.ast())
        .map_err(|e| classify_eval_error(&e, limit_ms))?;
    dynamic_to_json(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::engine::ScriptCompiler;
    use crate::script::Script;
    use kvscript_store::{KeyValueStore, MemoryStore};

    fn compile(text: &str) -> Arc<CompiledUnit> {
        Arc::new(ScriptCompiler::default().compile(&Script::new(text)).unwrap())
    }

    fn context(store: Arc<MemoryStore>, dry_run: bool) -> ExecutionContext {
        ExecutionContext::new(CapabilitySurface::new(store), dry_run)
    }

    #[tokio::test]
    async fn test_run_success_returns_value() {
        let store = Arc::new(MemoryStore::new());
        store.set("k1", "v1").unwrap();
        let outcome = ExecutionCoordinator::default()
            .run(
                compile(r#"get("k1")"#),
                context(store, false),
                Duration::from_secs(5),
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.value, Some(serde_json::json!("v1")));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_run_runtime_error_is_typed() {
        let outcome = ExecutionCoordinator::default()
            .run(
                compile("let x = (); x.foo()"),
                context(Arc::new(MemoryStore::new()), false),
                Duration::from_secs(5),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.value.is_none());
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Runtime));
    }

    #[tokio::test]
    async fn test_run_thrown_value_is_runtime_error() {
        let outcome = ExecutionCoordinator::default()
            .run(
                compile(r#"throw "boom""#),
                context(Arc::new(MemoryStore::new()), false),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Runtime));
        assert!(outcome.error_message().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let started = Instant::now();
        let outcome = ExecutionCoordinator::default()
            .run(
                compile("loop { }"),
                context(Arc::new(MemoryStore::new()), false),
                Duration::from_millis(100),
            )
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
        assert!(outcome.error_message().unwrap().contains("timeout"));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(outcome.elapsed_ms >= 100);
    }

    #[tokio::test]
    async fn test_dry_run_is_echoed_and_does_not_block_writes() {
        let store = Arc::new(MemoryStore::new());
        let outcome = ExecutionCoordinator::default()
            .run(
                compile(r#"set("written", "yes"); dry_run"#),
                context(store.clone(), true),
                Duration::from_secs(5),
            )
            .await;
        assert!(outcome.success);
        assert!(outcome.dry_run);
        assert_eq!(outcome.value, Some(serde_json::json!(true)));
        assert_eq!(store.get("written").unwrap().as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn test_partial_writes_persist_after_error() {
        let store = Arc::new(MemoryStore::new());
        let outcome = ExecutionCoordinator::default()
            .run(
                compile(r#"set("before", "1"); throw "halt"; set("after", "1");"#),
                context(store.clone(), false),
                Duration::from_secs(5),
            )
            .await;
        assert!(!outcome.success);
        assert!(store.exists("before").unwrap());
        assert!(!store.exists("after").unwrap());
    }

    #[tokio::test]
    async fn test_extra_variables_are_visible() {
        let outcome = ExecutionCoordinator::default()
            .run(
                compile("prefix + \":1\""),
                context(Arc::new(MemoryStore::new()), false).with_variable("prefix", "user"),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome.value, Some(serde_json::json!("user:1")));
    }

    #[test]
    fn test_outcome_serializes() {
        let err = ScriptError::Validation("empty script".into());
        let outcome = ExecutionOutcome::failure(&err, false, Uuid::nil())
            .with_elapsed(Duration::from_millis(3))
            .with_script("");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "validation");
        assert_eq!(json["elapsed_ms"], 3);
    }

    #[test]
    fn test_sub_millisecond_elapsed_rounds_up() {
        let err = ScriptError::Validation("x".into());
        let outcome = ExecutionOutcome::failure(&err, false, Uuid::nil());
        assert_eq!(outcome.clone().with_elapsed(Duration::from_micros(40)).elapsed_ms, 1);
        assert_eq!(outcome.with_elapsed(Duration::ZERO).elapsed_ms, 0);
    }
}
