//! RAII transaction scope over a [`FilterAdapter`].
//!
//! Mirrors the teacher's `CleanupGuard`: an armed/disarmed flag drives
//! `Drop`, so a transaction that is never explicitly committed aborts
//! automatically -- a panic or early return partway through reconciliation
//! can never leave provisional filters half-installed.

use portcullis_shared::errors::PortcullisResult;

use crate::adapter::{FilterAdapter, TransactionHandle};
use crate::compiler::CompiledFilter;

/// An open transaction against a [`FilterAdapter`].
///
/// Call [`TransactionScope::commit`] to make additions/removals visible.
/// Dropping the scope without committing aborts it, discarding every
/// mutation made through it.
pub struct TransactionScope {
    handle: Option<Box<dyn TransactionHandle>>,
    armed: bool,
}

impl TransactionScope {
    pub fn begin(adapter: &dyn FilterAdapter) -> PortcullisResult<Self> {
        let handle = adapter.begin_transaction()?;
        Ok(Self {
            handle: Some(handle),
            armed: true,
        })
    }

    pub fn add_filter(&mut self, filter: &CompiledFilter) -> PortcullisResult<()> {
        self.handle_mut().add_filter(filter)
    }

    pub fn remove_filter(&mut self, filter_key: u128) -> PortcullisResult<()> {
        self.handle_mut().remove_filter(filter_key)
    }

    /// Commit the transaction, consuming the scope. Disarms the drop-abort.
    pub fn commit(mut self) -> PortcullisResult<()> {
        self.armed = false;
        self.handle.take().expect("handle taken twice").commit()
    }

    /// Explicitly abort, consuming the scope.
    pub fn abort(mut self) -> PortcullisResult<()> {
        self.armed = false;
        self.handle.take().expect("handle taken twice").abort()
    }

    fn handle_mut(&mut self) -> &mut dyn TransactionHandle {
        self.handle.as_deref_mut().expect("handle taken twice")
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.abort() {
                tracing::warn!("auto-abort of dropped transaction failed: {e}");
            } else {
                tracing::debug!("transaction auto-aborted on drop");
            }
        }
    }
}
