//! In-memory reference [`FilterAdapter`]: the only backend this repository
//! ships. Installed filters live in a process-local set; nothing here
//! touches the real network stack.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use portcullis_shared::errors::PortcullisResult;

use super::{FilterAdapter, InstalledFilter, TransactionHandle};
use crate::compiler::CompiledFilter;

#[derive(Debug, Clone, Copy)]
enum PendingOp {
    Add(u128),
    Remove(u128),
}

/// In-memory filter store, shared by every open transaction.
#[derive(Default)]
pub struct InMemoryAdapter {
    installed: Arc<Mutex<HashSet<u128>>>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FilterAdapter for InMemoryAdapter {
    fn begin_transaction(&self) -> PortcullisResult<Box<dyn TransactionHandle>> {
        Ok(Box::new(InMemoryTransaction {
            installed: self.installed.clone(),
            pending: Vec::new(),
        }))
    }

    fn list_filters(&self) -> PortcullisResult<Vec<InstalledFilter>> {
        Ok(self
            .installed
            .lock()
            .iter()
            .map(|&filter_key| InstalledFilter { filter_key })
            .collect())
    }

    fn clear_all(&self) -> PortcullisResult<()> {
        self.installed.lock().clear();
        Ok(())
    }
}

struct InMemoryTransaction {
    installed: Arc<Mutex<HashSet<u128>>>,
    pending: Vec<PendingOp>,
}

impl TransactionHandle for InMemoryTransaction {
    fn add_filter(&mut self, filter: &CompiledFilter) -> PortcullisResult<()> {
        self.pending.push(PendingOp::Add(filter.filter_key));
        Ok(())
    }

    fn remove_filter(&mut self, filter_key: u128) -> PortcullisResult<()> {
        self.pending.push(PendingOp::Remove(filter_key));
        Ok(())
    }

    fn commit(self: Box<Self>) -> PortcullisResult<()> {
        let mut installed = self.installed.lock();
        for op in &self.pending {
            match *op {
                PendingOp::Add(key) => {
                    installed.insert(key);
                }
                PendingOp::Remove(key) => {
                    installed.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn abort(self: Box<Self>) -> PortcullisResult<()> {
        // Nothing was ever applied to `installed`; discarding `pending`
        // (via drop) is the entire rollback.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Action, Direction, Protocol};

    fn filter(key: u128) -> CompiledFilter {
        CompiledFilter {
            filter_key: key,
            rule_id: "r".into(),
            direction: Direction::Outbound,
            protocol: Protocol::Tcp,
            action: Action::Allow,
            network: "0.0.0.0/0".into(),
            port_start: 0,
            port_end: u16::MAX,
            process_path: None,
            weight: crate::compiler::BASE_WEIGHT,
        }
    }

    #[test]
    fn uncommitted_transaction_is_invisible() {
        let adapter = InMemoryAdapter::new();
        let mut txn = adapter.begin_transaction().unwrap();
        txn.add_filter(&filter(1)).unwrap();
        assert!(adapter.list_filters().unwrap().is_empty());
        txn.abort().unwrap();
        assert!(adapter.list_filters().unwrap().is_empty());
    }

    #[test]
    fn commit_applies_adds_and_removes() {
        let adapter = InMemoryAdapter::new();
        let mut txn = adapter.begin_transaction().unwrap();
        txn.add_filter(&filter(1)).unwrap();
        txn.add_filter(&filter(2)).unwrap();
        txn.commit().unwrap();
        assert_eq!(adapter.list_filters().unwrap().len(), 2);

        let mut txn2 = adapter.begin_transaction().unwrap();
        txn2.remove_filter(1).unwrap();
        txn2.commit().unwrap();
        let remaining = adapter.list_filters().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].filter_key, 2);
    }

    #[test]
    fn clear_all_removes_everything() {
        let adapter = InMemoryAdapter::new();
        let mut txn = adapter.begin_transaction().unwrap();
        txn.add_filter(&filter(1)).unwrap();
        txn.commit().unwrap();
        adapter.clear_all().unwrap();
        assert!(adapter.list_filters().unwrap().is_empty());
    }
}
