//! Idempotent reconciliation between a desired set of [`CompiledFilter`]s
//! and whatever is currently installed (spec.md §4.4).
//!
//! The diff is keyed entirely by `filter_key`, so re-applying an unchanged
//! policy is a no-op (every filter lands in `unchanged`), and changing a
//! single rule's content (which changes its key) always shows up as a
//! remove-plus-add pair rather than an in-place mutation the adapter
//! trait has no way to express.

use std::collections::HashSet;

use portcullis_shared::errors::PortcullisResult;

use crate::adapter::FilterAdapter;
use crate::compiler::CompiledFilter;
use crate::txn::TransactionScope;

/// Result of diffing desired state against installed state.
pub struct Diff<'a> {
    pub to_add: Vec<&'a CompiledFilter>,
    pub to_remove: Vec<u128>,
    pub unchanged_count: usize,
}

/// Compute the three-way diff in O(N+M) using the installed-filter-key set.
pub fn diff<'a>(desired: &'a [CompiledFilter], installed_keys: &HashSet<u128>) -> Diff<'a> {
    let desired_keys: HashSet<u128> = desired.iter().map(|f| f.filter_key).collect();

    let to_add: Vec<&CompiledFilter> = desired
        .iter()
        .filter(|f| !installed_keys.contains(&f.filter_key))
        .collect();

    let to_remove: Vec<u128> = installed_keys
        .iter()
        .filter(|k| !desired_keys.contains(k))
        .copied()
        .collect();

    let unchanged_count = desired_keys.intersection(installed_keys).count();

    Diff {
        to_add,
        to_remove,
        unchanged_count,
    }
}

/// Outcome of a successful reconciliation apply.
#[derive(Debug, Default, Clone)]
pub struct ApplyOutcome {
    pub filters_created: u64,
    pub filters_removed: u64,
    pub unchanged_count: u64,
}

/// Reconcile `desired` against the adapter's current state within a single
/// transaction: either every add/remove lands, or (on any failure) none of
/// them do, via the transaction scope's auto-abort-on-drop.
pub fn apply(
    adapter: &dyn FilterAdapter,
    desired: &[CompiledFilter],
) -> PortcullisResult<ApplyOutcome> {
    let installed = adapter.list_filters()?;
    let installed_keys: HashSet<u128> = installed.iter().map(|f| f.filter_key).collect();
    let computed = diff(desired, &installed_keys);

    let mut scope = TransactionScope::begin(adapter)?;
    for filter in &computed.to_add {
        scope.add_filter(filter)?;
    }
    for key in &computed.to_remove {
        scope.remove_filter(*key)?;
    }

    let outcome = ApplyOutcome {
        filters_created: computed.to_add.len() as u64,
        filters_removed: computed.to_remove.len() as u64,
        unchanged_count: computed.unchanged_count as u64,
    };

    scope.commit()?;
    Ok(outcome)
}
