//! Transactions and their lifecycle.

use crate::lock_manager::LockManager;
use keel_common::Rid;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transaction identifier. Lower ids are older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Lifecycle state of a transaction.
///
/// A transaction starts Growing; under non-strict two-phase locking the
/// first unlock moves it to Shrinking. Committed and Aborted are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// A transaction: an id, a lifecycle state, and the rids it holds locks on.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    state: TransactionState,
    shared_set: HashSet<Rid>,
    exclusive_set: HashSet<Rid>,
}

impl Transaction {
    /// Creates a transaction in the Growing state.
    pub fn new(id: u64) -> Self {
        Self {
            id: TxnId(id),
            state: TransactionState::Growing,
            shared_set: HashSet::new(),
            exclusive_set: HashSet::new(),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Sets the state.
    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Returns true if this transaction holds a shared lock on `rid`.
    pub fn holds_shared(&self, rid: &Rid) -> bool {
        self.shared_set.contains(rid)
    }

    /// Returns true if this transaction holds an exclusive lock on `rid`.
    pub fn holds_exclusive(&self, rid: &Rid) -> bool {
        self.exclusive_set.contains(rid)
    }

    /// Rids locked in shared mode.
    pub fn shared_set(&self) -> &HashSet<Rid> {
        &self.shared_set
    }

    /// Rids locked in exclusive mode.
    pub fn exclusive_set(&self) -> &HashSet<Rid> {
        &self.exclusive_set
    }

    pub(crate) fn shared_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.shared_set
    }

    pub(crate) fn exclusive_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.exclusive_set
    }
}

/// Hands out transactions with monotonically increasing ids and finalizes
/// them against the lock manager.
pub struct TransactionManager {
    lock_manager: Arc<LockManager>,
    next_id: AtomicU64,
}

impl TransactionManager {
    /// Creates a transaction manager over a lock manager.
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            lock_manager,
            next_id: AtomicU64::new(0),
        }
    }

    /// Begins a fresh transaction.
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Commits a transaction and releases every lock it holds.
    pub fn commit(&self, txn: &mut Transaction) {
        txn.set_state(TransactionState::Committed);
        self.lock_manager.unlock_all(txn);
    }

    /// Aborts a transaction and releases every lock it holds.
    pub fn abort(&self, txn: &mut Transaction) {
        txn.set_state(TransactionState::Aborted);
        self.lock_manager.unlock_all(txn);
    }
}
