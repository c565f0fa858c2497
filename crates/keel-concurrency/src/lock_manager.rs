//! Two-phase row locking with wait-die deadlock prevention.
//!
//! Each rid has a FIFO queue of lock requests. Shared requests are granted
//! together once everything ahead of them is granted shared; an exclusive
//! request is granted alone when it reaches the head. Admission follows
//! wait-die: an older transaction (lower id) may wait behind a younger
//! lock holder, but a younger transaction asking against an older holder
//! aborts immediately. Every wait edge therefore points from older to
//! younger and no cycle can form.
//!
//! A single mutex and condition variable guard the whole table; fairness
//! is queue order.

use crate::transaction::{Transaction, TransactionState, TxnId};
use keel_common::Rid;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};

/// Lock mode of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A single transaction's position in a rid's queue.
#[derive(Debug)]
struct Request {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-rid wait queue.
///
/// `oldest` caches the minimum transaction id in the queue for O(1)
/// wait-die admission tests; `exclusive_count` caches the number of
/// exclusive requests.
struct LockQueue {
    requests: VecDeque<Request>,
    oldest: TxnId,
    exclusive_count: u32,
}

impl LockQueue {
    fn new(oldest: TxnId) -> Self {
        Self {
            requests: VecDeque::new(),
            oldest,
            exclusive_count: 0,
        }
    }

    fn position_of(&self, txn_id: TxnId) -> Option<usize> {
        self.requests.iter().position(|r| r.txn_id == txn_id)
    }
}

/// Row lock manager.
///
/// With `strict_two_phase` set, locks may only be released by a committed
/// or aborted transaction; otherwise the first unlock moves the
/// transaction into its shrinking phase.
pub struct LockManager {
    strict_two_phase: bool,
    table: Mutex<HashMap<Rid, LockQueue>>,
    cond: Condvar,
}

impl LockManager {
    /// Creates a lock manager.
    pub fn new(strict_two_phase: bool) -> Self {
        Self {
            strict_two_phase,
            table: Mutex::new(HashMap::new()),
            cond: Condvar::new(),
        }
    }

    /// Returns true if strict two-phase locking is enforced.
    pub fn is_strict(&self) -> bool {
        self.strict_two_phase
    }

    /// Acquires a shared lock on `rid`.
    ///
    /// Blocks until every request ahead in the queue is a granted shared
    /// lock. Returns false and aborts the transaction when wait-die
    /// forbids waiting or the transaction may no longer grow.
    pub fn lock_shared(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if !self.admissible(txn) {
            return false;
        }
        if txn.holds_shared(&rid) || txn.holds_exclusive(&rid) {
            return true;
        }

        let mut table = self.table.lock();
        let queue = table.entry(rid).or_insert_with(|| LockQueue::new(txn.id()));

        if !queue.requests.is_empty() && queue.exclusive_count > 0 && txn.id() > queue.oldest {
            debug!("wait-die: {} dies requesting S on {rid}", txn.id());
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        queue.oldest = queue.oldest.min(txn.id());
        queue.requests.push_back(Request {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });

        loop {
            let queue = table.get(&rid).expect("queue exists while waiting");
            let ready = queue
                .requests
                .iter()
                .take_while(|r| r.txn_id != txn.id())
                .all(|r| r.mode == LockMode::Shared && r.granted);
            if ready {
                break;
            }
            self.cond.wait(&mut table);
        }

        let queue = table.get_mut(&rid).expect("queue exists at grant");
        let position = queue.position_of(txn.id()).expect("request still queued");
        queue.requests[position].granted = true;
        txn.shared_set_mut().insert(rid);
        drop(table);

        // Shared grants come in batches: wake the other shared waiters.
        self.cond.notify_all();
        true
    }

    /// Acquires an exclusive lock on `rid`.
    ///
    /// Blocks until the request reaches the head of the queue. Returns
    /// false and aborts the transaction when wait-die forbids waiting or
    /// the transaction may no longer grow.
    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if !self.admissible(txn) {
            return false;
        }
        if txn.holds_exclusive(&rid) {
            return true;
        }
        if txn.holds_shared(&rid) {
            // Held in shared mode already: this must go through an upgrade.
            return false;
        }

        let mut table = self.table.lock();
        let queue = table.entry(rid).or_insert_with(|| LockQueue::new(txn.id()));

        if !queue.requests.is_empty() && txn.id() > queue.oldest {
            debug!("wait-die: {} dies requesting X on {rid}", txn.id());
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        queue.oldest = queue.oldest.min(txn.id());
        queue.exclusive_count += 1;
        queue.requests.push_back(Request {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });

        loop {
            let queue = table.get(&rid).expect("queue exists while waiting");
            if queue.requests.front().map(|r| r.txn_id) == Some(txn.id()) {
                break;
            }
            self.cond.wait(&mut table);
        }

        let queue = table.get_mut(&rid).expect("queue exists at grant");
        queue.requests[0].granted = true;
        txn.exclusive_set_mut().insert(rid);
        true
    }

    /// Upgrades a held shared lock to exclusive.
    ///
    /// The upgrade waits until the transaction's shared request is at the
    /// head of the queue and no other grant is outstanding, then flips its
    /// mode in place.
    ///
    /// # Panics
    ///
    /// Panics if the transaction holds no granted shared lock on `rid`.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if !self.admissible(txn) {
            return false;
        }
        assert!(
            txn.holds_shared(&rid),
            "lock_upgrade: {} holds no shared lock on {rid}",
            txn.id()
        );

        let mut table = self.table.lock();
        loop {
            let queue = table.get(&rid).expect("held shared lock has a queue");
            let position = queue
                .position_of(txn.id())
                .expect("held shared lock is queued");
            let sole_grant = queue
                .requests
                .iter()
                .enumerate()
                .all(|(i, r)| i == position || !r.granted);
            if position == 0 && sole_grant {
                break;
            }
            self.cond.wait(&mut table);
        }

        let queue = table.get_mut(&rid).expect("queue exists at upgrade");
        queue.requests[0].mode = LockMode::Exclusive;
        queue.exclusive_count += 1;
        txn.shared_set_mut().remove(&rid);
        txn.exclusive_set_mut().insert(rid);
        true
    }

    /// Releases a lock held on `rid`.
    ///
    /// Under strict two-phase locking the transaction must already be
    /// committed or aborted; a premature unlock aborts it. Otherwise the
    /// first unlock moves a growing transaction into its shrinking phase.
    ///
    /// # Panics
    ///
    /// Panics if the transaction has no request queued on `rid`.
    pub fn unlock(&self, txn: &mut Transaction, rid: Rid) -> bool {
        let mut table = self.table.lock();

        if self.strict_two_phase
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            debug!("strict 2PL: {} aborted unlocking {rid} early", txn.id());
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let remove_queue = {
            let Some(queue) = table.get_mut(&rid) else {
                panic!("unlock: {} holds no lock on {rid}", txn.id());
            };
            let Some(position) = queue.position_of(txn.id()) else {
                panic!("unlock: {} holds no lock on {rid}", txn.id());
            };

            if txn.state() == TransactionState::Growing {
                txn.set_state(TransactionState::Shrinking);
            }

            let request = queue.requests.remove(position).expect("position in bounds");
            if request.mode == LockMode::Exclusive {
                queue.exclusive_count -= 1;
            }
            if queue.requests.is_empty() {
                true
            } else {
                queue.oldest = queue
                    .requests
                    .iter()
                    .map(|r| r.txn_id)
                    .min()
                    .expect("queue is non-empty");
                false
            }
        };
        if remove_queue {
            table.remove(&rid);
        }

        txn.shared_set_mut().remove(&rid);
        txn.exclusive_set_mut().remove(&rid);
        drop(table);

        self.cond.notify_all();
        true
    }

    /// Releases every lock the transaction still holds.
    pub fn unlock_all(&self, txn: &mut Transaction) {
        let rids: Vec<Rid> = txn
            .shared_set()
            .iter()
            .chain(txn.exclusive_set().iter())
            .copied()
            .collect();
        for rid in rids {
            self.unlock(txn, rid);
        }
    }

    /// Checks that the transaction may acquire new locks.
    ///
    /// Aborted transactions fail quietly; a transaction past its growing
    /// phase is aborted for violating two-phase locking.
    fn admissible(&self, txn: &mut Transaction) -> bool {
        match txn.state() {
            TransactionState::Growing => true,
            TransactionState::Aborted => false,
            _ => {
                debug!("{} requested a lock outside its growing phase", txn.id());
                txn.set_state(TransactionState::Aborted);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid() -> Rid {
        Rid::from_i64(0)
    }

    #[test]
    fn test_shared_then_shared_both_granted() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);
        let mut t1 = Transaction::new(1);

        assert!(lm.lock_shared(&mut t0, rid()));
        assert!(lm.lock_shared(&mut t1, rid()));
        assert!(t0.holds_shared(&rid()));
        assert!(t1.holds_shared(&rid()));
    }

    #[test]
    fn test_wait_die_younger_dies_on_exclusive() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);
        let mut t1 = Transaction::new(1);

        assert!(lm.lock_shared(&mut t0, rid()));
        assert!(!lm.lock_exclusive(&mut t1, rid()));
        assert_eq!(t1.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_wait_die_younger_dies_on_shared_against_exclusive() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);
        let mut t1 = Transaction::new(1);

        assert!(lm.lock_exclusive(&mut t0, rid()));
        assert!(!lm.lock_shared(&mut t1, rid()));
        assert_eq!(t1.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_shared_queue_admits_younger_when_no_exclusive() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);
        let mut t5 = Transaction::new(5);

        assert!(lm.lock_shared(&mut t0, rid()));
        // No exclusive request in the queue: the younger reader joins.
        assert!(lm.lock_shared(&mut t5, rid()));
    }

    #[test]
    fn test_relock_held_lock_is_idempotent() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);

        assert!(lm.lock_shared(&mut t0, rid()));
        assert!(lm.lock_shared(&mut t0, rid()));
        assert!(lm.lock_exclusive(&mut t0, Rid::from_i64(1)));
        assert!(lm.lock_exclusive(&mut t0, Rid::from_i64(1)));
    }

    #[test]
    fn test_exclusive_while_holding_shared_requires_upgrade() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);

        assert!(lm.lock_shared(&mut t0, rid()));
        assert!(!lm.lock_exclusive(&mut t0, rid()));
        assert!(lm.lock_upgrade(&mut t0, rid()));
        assert!(t0.holds_exclusive(&rid()));
        assert!(!t0.holds_shared(&rid()));
    }

    #[test]
    #[should_panic(expected = "holds no shared lock")]
    fn test_upgrade_without_shared_panics() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);
        lm.lock_upgrade(&mut t0, rid());
    }

    #[test]
    fn test_unlock_transitions_to_shrinking() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);

        assert!(lm.lock_shared(&mut t0, rid()));
        assert!(lm.unlock(&mut t0, rid()));
        assert_eq!(t0.state(), TransactionState::Shrinking);
        assert!(!t0.holds_shared(&rid()));
    }

    #[test]
    fn test_lock_after_shrinking_aborts() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);

        assert!(lm.lock_shared(&mut t0, rid()));
        assert!(lm.unlock(&mut t0, rid()));
        assert!(!lm.lock_shared(&mut t0, Rid::from_i64(1)));
        assert_eq!(t0.state(), TransactionState::Aborted);
    }

    #[test]
    #[should_panic(expected = "holds no lock")]
    fn test_unlock_without_lock_panics() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);
        lm.unlock(&mut t0, rid());
    }

    #[test]
    fn test_strict_unlock_before_commit_aborts() {
        let lm = LockManager::new(true);
        let mut t0 = Transaction::new(0);

        assert!(lm.lock_shared(&mut t0, rid()));
        assert!(!lm.unlock(&mut t0, rid()));
        assert_eq!(t0.state(), TransactionState::Aborted);
        // The lock itself is still held until the abort is finalized.
        assert!(t0.holds_shared(&rid()));
    }

    #[test]
    fn test_strict_unlock_after_commit_succeeds() {
        let lm = LockManager::new(true);
        let mut t0 = Transaction::new(0);

        assert!(lm.lock_shared(&mut t0, rid()));
        t0.set_state(TransactionState::Committed);
        assert!(lm.unlock(&mut t0, rid()));
    }

    #[test]
    fn test_aborted_transaction_cannot_lock() {
        let lm = LockManager::new(false);
        let mut t0 = Transaction::new(0);
        t0.set_state(TransactionState::Aborted);
        assert!(!lm.lock_shared(&mut t0, rid()));
        assert!(!lm.lock_exclusive(&mut t0, rid()));
    }
}
