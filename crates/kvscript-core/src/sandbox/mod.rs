//! Sandbox: policy-screened, capability-restricted script execution.
//!
//! Scripts are screened by a textual policy, compiled by a Rhai engine with
//! no module loading and no `eval`, and run on a blocking worker whose only
//! host access is the capability surface. A wall-clock budget bounds every
//! run; cancellation past the budget is best-effort.
//!
//! # Modules
//!
//! - [`policy`]: `PolicyValidator` (deny-list + builtin heuristics)
//! - [`capability`]: `CapabilitySurface` (store functions visible to scripts)
//! - [`engine`]: restricted engine, `ScriptCompiler`, `CompiledUnit`
//! - [`execution`]: `ExecutionContext`, `ExecutionOutcome`, `ExecutionCoordinator`
//! - [`error`]: `ScriptError` / `ErrorKind`

pub mod capability;
pub mod engine;
pub mod error;
pub mod execution;
pub mod policy;

pub use capability::{CapabilitySurface, SURFACE_FUNCTIONS};
pub use engine::{CompiledUnit, EngineLimits, ScriptCompiler};
pub use error::{ErrorKind, ScriptError, ScriptResult};
pub use execution::{
    ExecutionContext, ExecutionCoordinator, ExecutionOutcome, OutcomeError, DRY_RUN_VAR,
};
pub use policy::PolicyValidator;
