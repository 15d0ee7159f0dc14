//! In-memory pool of unconfirmed transactions.
//!
//! Holds user-submitted transactions awaiting inclusion in a block
//! template, keyed by transaction id. Verification happens at block commit
//! rather than on insert; adding a duplicate id silently coalesces. The
//! pool is not durable and starts empty on every restart.
//!
//! Not thread-safe on its own; the mining coordinator guards it with the
//! same lock that serializes chain mutations.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{Hash256, Transaction};

/// The set of pending transactions.
#[derive(Default)]
pub struct Mempool {
    entries: HashMap<Hash256, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction. A duplicate id is silently coalesced.
    pub fn add(&mut self, tx: Transaction) {
        if self.entries.contains_key(&tx.id) {
            debug!(id = %tx.id, "duplicate transaction ignored");
            return;
        }
        debug!(id = %tx.id, "transaction added to mempool");
        self.entries.insert(tx.id, tx);
    }

    /// A stable copy of the pool for template building.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.entries.values().cloned().collect()
    }

    /// Remove the given transactions by id. Unknown ids are ignored.
    pub fn evict(&mut self, txs: &[Transaction]) {
        for tx in txs {
            if self.entries.remove(&tx.id).is_some() {
                debug!(id = %tx.id, "transaction evicted from mempool");
            }
        }
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &Hash256) -> Option<&Transaction> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::amount::Amount;

    fn tx(seed: u8) -> Transaction {
        Transaction::coinbase(Address::from_bytes([seed; 20]), b"mempool", Amount::ZERO)
            .unwrap()
    }

    #[test]
    fn starts_empty() {
        let pool = Mempool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
        assert!(pool.snapshot().is_empty());
    }

    #[test]
    fn add_and_lookup() {
        let mut pool = Mempool::new();
        let t = tx(1);
        pool.add(t.clone());
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&t.id));
        assert_eq!(pool.get(&t.id), Some(&t));
    }

    #[test]
    fn duplicates_coalesce_silently() {
        let mut pool = Mempool::new();
        let t = tx(1);
        pool.add(t.clone());
        pool.add(t.clone());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut pool = Mempool::new();
        pool.add(tx(1));
        let snapshot = pool.snapshot();
        pool.add(tx(2));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn evict_removes_by_id() {
        let mut pool = Mempool::new();
        let a = tx(1);
        let b = tx(2);
        pool.add(a.clone());
        pool.add(b.clone());

        pool.evict(std::slice::from_ref(&a));
        assert!(!pool.contains(&a.id));
        assert!(pool.contains(&b.id));
    }

    #[test]
    fn evict_unknown_is_noop() {
        let mut pool = Mempool::new();
        pool.add(tx(1));
        pool.evict(&[tx(9)]);
        assert_eq!(pool.len(), 1);
    }
}
