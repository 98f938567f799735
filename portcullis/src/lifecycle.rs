//! Startup/shutdown orchestration and the single system-wide mutator lock
//! (spec.md §5, §7).
//!
//! Startup is fail-open: if the Last-Known-Good store is absent, corrupt,
//! or the adapter cannot be reached, the daemon comes up with no filters
//! installed rather than refusing to start (spec.md §4.6). Teardown is
//! never implicit -- shutting the daemon down leaves whatever was last
//! applied installed; only an explicit `Teardown` request clears it
//! (spec.md §4.9).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use portcullis_shared::errors::{PortcullisError, PortcullisResult};
use portcullis_shared::wire::ApplyCounters;

use crate::adapter::FilterAdapter;
use crate::audit::{self, AuditEvent};
use crate::compiler::{self, CompiledFilter};
use crate::config::{DaemonConfig, Layout};
use crate::lkg::{self, LoadOutcome};
use crate::policy::{self, Policy};
use crate::reconciler;

/// Shared daemon state, handed to the IPC dispatcher and the file watcher.
pub struct DaemonState {
    pub config: DaemonConfig,
    pub layout: Layout,
    adapter: Arc<dyn FilterAdapter>,
    current_policy: RwLock<Option<Policy>>,
    previous_policy: RwLock<Option<Policy>>,
    /// Serializes every mutating IPC request and every hot-reload apply, so
    /// only one reconciliation is ever in flight (spec.md §5).
    mutator: tokio::sync::Mutex<()>,
    watch_path: RwLock<Option<std::path::PathBuf>>,
}

/// Outcome of the fail-open startup sequence.
pub struct StartupReport {
    pub installed_from_lkg: bool,
    pub reason: Option<String>,
}

impl DaemonState {
    pub fn new(config: DaemonConfig, layout: Layout, adapter: Arc<dyn FilterAdapter>) -> Self {
        Self {
            config,
            layout,
            adapter,
            current_policy: RwLock::new(None),
            previous_policy: RwLock::new(None),
            mutator: tokio::sync::Mutex::new(()),
            watch_path: RwLock::new(None),
        }
    }

    /// Attempt to load and apply the LKG policy. Any failure results in a
    /// clean, filter-less startup rather than a startup error.
    pub fn startup(&self) -> StartupReport {
        match lkg::load(&self.layout.lkg_path()) {
            LoadOutcome::Absent => StartupReport {
                installed_from_lkg: false,
                reason: Some("no LKG policy present".to_string()),
            },
            LoadOutcome::Corrupt(reason) => {
                tracing::warn!("LKG policy unusable at startup, failing open: {reason}");
                StartupReport {
                    installed_from_lkg: false,
                    reason: Some(reason),
                }
            }
            LoadOutcome::Present(policy) => match self.install(&policy) {
                Ok(_) => {
                    *self.current_policy.write() = Some(policy);
                    StartupReport {
                        installed_from_lkg: true,
                        reason: None,
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to install LKG policy at startup, failing open: {e}");
                    StartupReport {
                        installed_from_lkg: false,
                        reason: Some(e.to_string()),
                    }
                }
            },
        }
    }

    /// Validate, compile, and reconcile a new policy, persisting it as LKG
    /// on success. Runs under the mutator lock.
    pub async fn apply(
        &self,
        policy: Policy,
        timeout: Duration,
    ) -> PortcullisResult<ApplyCounters> {
        let _permit = self.acquire_mutator(timeout).await?;
        let result = self.apply_locked(&policy);
        self.record(&result, "apply");
        let counters = result?;
        *self.previous_policy.write() = self.current_policy.read().clone();
        *self.current_policy.write() = Some(policy);
        Ok(counters)
    }

    fn apply_locked(&self, policy: &Policy) -> PortcullisResult<ApplyCounters> {
        policy::validate(policy)?;

        let compiled = compiler::compile(policy);
        if !compiled.errors.is_empty() {
            return Err(PortcullisError::CompilationFailed(compiled.errors));
        }

        let outcome = reconciler::apply(self.adapter.as_ref(), &compiled.filters)?;

        lkg::save(&self.layout.lkg_path(), &self.layout.lkg_tmp_path(), policy)?;

        Ok(ApplyCounters {
            filters_created: outcome.filters_created,
            filters_removed: outcome.filters_removed,
            rules_skipped: compiled.skipped_count,
            total_rules: policy.rules.len() as u64,
            policy_version: Some(policy.version.clone()),
            compilation_errors: Vec::new(),
        })
    }

    /// Re-apply the previously-installed policy, undoing the most recent
    /// `apply` (spec.md §4.5).
    pub async fn rollback(&self, timeout: Duration) -> PortcullisResult<ApplyCounters> {
        let _permit = self.acquire_mutator(timeout).await?;
        let previous = self.previous_policy.read().clone().ok_or_else(|| {
            PortcullisError::InvalidState("no previous policy to roll back to".into())
        })?;
        let result = self.apply_locked(&previous);
        self.record(&result, "rollback");
        let counters = result?;
        *self.current_policy.write() = Some(previous);
        Ok(counters)
    }

    /// Re-install whatever is currently persisted as LKG, discarding any
    /// in-memory state (spec.md §4.6).
    pub async fn revert_to_lkg(&self, timeout: Duration) -> PortcullisResult<ApplyCounters> {
        let _permit = self.acquire_mutator(timeout).await?;
        let policy = match lkg::load(&self.layout.lkg_path()) {
            LoadOutcome::Present(p) => p,
            LoadOutcome::Absent => {
                return Err(PortcullisError::NotFound("no LKG policy present".into()))
            }
            LoadOutcome::Corrupt(reason) => {
                return Err(PortcullisError::InvalidState(format!(
                    "LKG policy is corrupt: {reason}"
                )))
            }
        };
        let compiled = compiler::compile(&policy);
        let outcome = reconciler::apply(self.adapter.as_ref(), &compiled.filters);
        self.record(&outcome, "revert_lkg");
        let outcome = outcome?;
        let total_rules = policy.rules.len() as u64;
        let policy_version = policy.version.clone();
        *self.current_policy.write() = Some(policy);
        Ok(ApplyCounters {
            filters_created: outcome.filters_created,
            filters_removed: outcome.filters_removed,
            rules_skipped: compiled.skipped_count,
            total_rules,
            policy_version: Some(policy_version),
            compilation_errors: Vec::new(),
        })
    }

    /// Remove every installed filter, explicitly requested (spec.md §4.9).
    /// Never called implicitly on shutdown.
    pub async fn teardown(&self, timeout: Duration) -> PortcullisResult<()> {
        let _permit = self.acquire_mutator(timeout).await?;
        let result = self.adapter.clear_all();
        self.record(&result, "teardown");
        result?;
        *self.current_policy.write() = None;
        Ok(())
    }

    pub fn current_policy(&self) -> Option<Policy> {
        self.current_policy.read().clone()
    }

    pub fn set_watch_path(&self, path: Option<std::path::PathBuf>) {
        *self.watch_path.write() = path;
    }

    pub fn watch_path(&self) -> Option<std::path::PathBuf> {
        self.watch_path.read().clone()
    }

    fn install(&self, policy: &Policy) -> PortcullisResult<()> {
        policy::validate(policy)?;
        let compiled = compiler::compile(policy);
        if !compiled.errors.is_empty() {
            return Err(PortcullisError::CompilationFailed(compiled.errors));
        }
        reconciler::apply(self.adapter.as_ref(), &compiled.filters)?;
        Ok(())
    }

    async fn acquire_mutator(
        &self,
        timeout: Duration,
    ) -> PortcullisResult<tokio::sync::MutexGuard<'_, ()>> {
        tokio::time::timeout(timeout, self.mutator.lock())
            .await
            .map_err(|_| PortcullisError::Busy)
    }

    fn record<T>(&self, result: &PortcullisResult<T>, operation: &str) {
        let event = match result {
            Ok(_) => AuditEvent::success(operation, None),
            Err(e) => AuditEvent::failure(operation, e),
        };
        if let Err(e) = audit::append(&self.layout.audit_log_path(), &event) {
            tracing::warn!("failed to append audit event: {e}");
        }
    }
}

/// Recompile a policy's filters, without touching any adapter state.
/// Used by `Validate` requests, which must never mutate anything.
pub fn compile_preview(policy: &Policy) -> PortcullisResult<Vec<CompiledFilter>> {
    policy::validate(policy)?;
    let compiled = compiler::compile(policy);
    if !compiled.errors.is_empty() {
        return Err(PortcullisError::CompilationFailed(compiled.errors));
    }
    Ok(compiled.filters)
}
