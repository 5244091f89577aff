//! Transactional core for LatticeDB
//!
//! This crate implements the optimistic-concurrency heart of the engine:
//!
//! - [`EventRegistry`]: the per-(table, transaction) ordered journal of
//!   row additions, removals, and updates, with the commit-clash test
//! - [`TransactionIndexSet`]: the copy-on-write snapshot of one table's
//!   indexes attached to one transaction
//! - [`TableSource`]: the persistent master record of one table: its
//!   schema, committed row bitmap, staged row pool, and the history of
//!   committed registries
//! - [`Transaction`]: a begin-time snapshot of the visible tables plus
//!   the journals and index sets the transaction accumulates
//! - [`LockManager`]: table-granularity shared/exclusive locks acquired
//!   in sorted order
//! - the constraint checker ([`constraints`])
//! - [`CommitManager`]: the serialized commit pipeline that validates,
//!   merges, and publishes transactions
//!
//! Commits are totally ordered by a monotonic commit-id; a transaction
//! that began at commit-id `c` observes exactly the commits `≤ c` until
//! it layers its own writes on top.

#![warn(clippy::all)]

pub mod commit;
pub mod constraints;
pub mod events;
pub mod indexset;
pub mod locks;
pub mod registry;
pub mod source;
pub mod transaction;

pub use commit::{CommitContext, CommitManager, CommitOutcome, ObjectCommitState};
pub use events::{CommitEvent, SchemaAction, SchemaChangeEvent, TableChangeEvent};
pub use indexset::{IndexDef, IndexKey, IndexSetSnapshot, RowIndex, TransactionIndexSet};
pub use locks::{LockHandle, LockManager, LockMode};
pub use registry::{EventRegistry, TableEvent};
pub use source::{
    CommittedState, MutableTable, SourceDirectory, SourceRegistry, TableSource, TableView,
};
pub use transaction::{IsolationLevel, TableSnapshot, Transaction, TxState};
