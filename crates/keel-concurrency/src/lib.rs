//! Transactions and two-phase row locking for KeelDB.
//!
//! This crate provides:
//! - Transactions with growing/shrinking lifecycle tracking
//! - A row lock manager supporting shared, exclusive, and upgrade modes
//! - Wait-die deadlock prevention
//! - Optional strict two-phase locking

pub mod lock_manager;
pub mod transaction;

pub use lock_manager::{LockManager, LockMode};
pub use transaction::{Transaction, TransactionManager, TransactionState, TxnId};
