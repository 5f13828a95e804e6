//! Structured observability hooks for script executions.
//!
//! - `ExecutionSpan` tags every log line of one execution with its id and
//!   script digest
//! - `emit_*` functions log lifecycle events with an `event` field

use tracing::{info, warn, Span};
use uuid::Uuid;

use crate::sandbox::ExecutionOutcome;
use crate::script::Digest;

/// Execution-scoped tracing span.
///
/// Unlike an entered guard, the span is attached to the service future with
/// `tracing::Instrument`, so it follows the execution across awaits.
pub struct ExecutionSpan {
    span: Span,
}

impl ExecutionSpan {
    pub fn new(execution_id: Uuid, digest: &Digest, dry_run: bool) -> Self {
        let span = tracing::info_span!(
            "kvscript.execute",
            execution_id = %execution_id,
            digest = %digest.short(),
            dry_run = dry_run,
        );
        Self { span }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }
}

/// Emit event: execution finished, successfully or not.
pub fn emit_execution_finished(outcome: &ExecutionOutcome) {
    info!(
        event = "execution.finished",
        execution_id = %outcome.execution_id,
        success = outcome.success,
        elapsed_ms = outcome.elapsed_ms,
        error_kind = %outcome.error_kind().map(|k| k.to_string()).unwrap_or_default(),
    );
}

/// Emit event: script rejected before compilation.
pub fn emit_policy_rejected(execution_id: Uuid, reason: &dyn std::fmt::Display) {
    warn!(event = "policy.rejected", execution_id = %execution_id, reason = %reason);
}

/// Emit event: script exceeded its time budget. The worker has been
/// signalled to stop and is no longer awaited.
pub fn emit_timeout(execution_id: Uuid, limit_ms: u64) {
    warn!(event = "execution.timeout", execution_id = %execution_id, limit_ms = limit_ms);
}
