//! Script execution facade.
//!
//! [`ScriptExecutionService::execute`] sequences one call end to end:
//!
//! 1. Validate the text against the policy
//! 2. Look up (or compile) the unit in the cache
//! 3. Bind a fresh context and capability surface
//! 4. Run under the configured time budget
//!
//! Validation and compile failures short-circuit before the store is ever
//! reachable. Every path returns an [`ExecutionOutcome`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use kvscript_store::KeyValueStore;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::cache::{CacheStats, CompiledScriptCache};
use crate::config::{ConfigError, ScriptConfig};
use crate::metrics::METRICS;
use crate::obs::{self, ExecutionSpan};
use crate::sandbox::{
    CapabilitySurface, CompiledUnit, ExecutionContext, ExecutionCoordinator, ExecutionOutcome,
    PolicyValidator, ScriptCompiler, ScriptResult,
};
use crate::script::{Digest, Script};

pub struct ScriptExecutionService {
    config: ScriptConfig,
    store: Arc<dyn KeyValueStore>,
    validator: PolicyValidator,
    compiler: Arc<ScriptCompiler>,
    cache: Option<Arc<CompiledScriptCache>>,
    coordinator: ExecutionCoordinator,
}

impl std::fmt::Debug for ScriptExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptExecutionService")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ScriptExecutionService {
    /// Build a service over `store`. Fails if `config` does not validate.
    pub fn new(config: ScriptConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let limits = config.engine_limits();
        let compiler = Arc::new(ScriptCompiler::new(&limits));
        let cache = config.cache_enabled.then(|| {
            Arc::new(CompiledScriptCache::new(
                compiler.clone(),
                config.cache_max_entries,
            ))
        });
        Ok(Self {
            validator: PolicyValidator::new(&config.forbidden_patterns),
            coordinator: ExecutionCoordinator::new(limits),
            compiler,
            cache,
            store,
            config,
        })
    }

    /// Build a service that uses a caller-owned cache, e.g. one shared by
    /// several services. `cache_enabled` and `cache_max_entries` are ignored.
    pub fn with_cache(
        config: ScriptConfig,
        store: Arc<dyn KeyValueStore>,
        cache: Arc<CompiledScriptCache>,
    ) -> Result<Self, ConfigError> {
        let mut service = Self::new(
            ScriptConfig {
                cache_enabled: false,
                ..config
            },
            store,
        )?;
        service.config.cache_enabled = true;
        service.cache = Some(cache);
        Ok(service)
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Cache counters, or `None` when caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Execute `script_text` under the configured time budget.
    ///
    /// `dry_run` is echoed in the outcome and visible to the script as the
    /// `dry_run` constant. It does not block writes.
    pub async fn execute(&self, script_text: &str, dry_run: bool) -> ExecutionOutcome {
        self.execute_with_timeout(script_text, dry_run, self.config.max_execution_time())
            .await
    }

    /// Execute with a per-call time budget in place of the configured one.
    pub async fn execute_with_timeout(
        &self,
        script_text: &str,
        dry_run: bool,
        timeout: Duration,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let script = Script::new(script_text);
        let execution_id = Uuid::new_v4();
        let span = ExecutionSpan::new(execution_id, &script.digest(), dry_run).span();

        let outcome = self
            .pipeline(&script, dry_run, timeout, execution_id)
            .instrument(span.clone())
            .await
            .with_elapsed(started.elapsed())
            .with_script(script_text);

        METRICS.record_outcome(&outcome);
        span.in_scope(|| obs::emit_execution_finished(&outcome));
        outcome
    }

    /// Validate and compile without executing. Warms the cache when enabled.
    pub async fn check(&self, script_text: &str) -> ScriptResult<Digest> {
        let script = Script::new(script_text);
        self.validator.validate(script.text())?;
        let unit = self.compiled(&script).await?;
        Ok(unit.digest())
    }

    async fn pipeline(
        &self,
        script: &Script,
        dry_run: bool,
        timeout: Duration,
        execution_id: Uuid,
    ) -> ExecutionOutcome {
        if let Err(err) = self.validator.validate(script.text()) {
            obs::emit_policy_rejected(execution_id, &err);
            return ExecutionOutcome::failure(&err, dry_run, execution_id);
        }

        let unit = match self.compiled(script).await {
            Ok(unit) => unit,
            Err(err) => {
                debug!(error = %err, "script failed to compile");
                return ExecutionOutcome::failure(&err, dry_run, execution_id);
            }
        };

        let context = ExecutionContext::new(CapabilitySurface::new(self.store.clone()), dry_run)
            .with_execution_id(execution_id);
        self.coordinator.run(unit, context, timeout).await
    }

    async fn compiled(&self, script: &Script) -> ScriptResult<Arc<CompiledUnit>> {
        match &self.cache {
            Some(cache) => cache.get_or_compile(script).await,
            None => self.compiler.compile(script).map(Arc::new),
        }
    }
}
