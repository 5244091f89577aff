//! Database engine for LatticeDB
//!
//! This crate orchestrates the lower layers into the embeddable surface:
//!
//! - [`Database`]: opens or creates the paged store, boots the table
//!   state store and source registry, owns the commit manager, lock
//!   manager, object catalog, and event dispatcher
//! - [`Session`]: binds a transaction to a user, acquires statement
//!   locks, runs immediate constraint checks, wraps DDL into the
//!   transaction's created/dropped sets (behind the privilege callback)
//! - [`Catalog`]: views, sequences, and triggers
//! - [`EventDispatcher`]: typed post-commit channels drained by a
//!   dedicated worker thread with a bounded queue
//!
//! The engine is the only layer that knows about configuration files,
//! recovery-on-open, and cross-layer coordination; everything
//! transactional lives in `lattice-txn`.

#![warn(clippy::all)]

pub mod catalog;
pub mod database;
pub mod events;
pub mod session;

pub use catalog::{
    Catalog, CatalogChange, CatalogObject, SequenceDef, TriggerDef, TriggerOn, ViewDef,
};
pub use database::{Database, DatabaseBuilder, DatabaseConfig};
pub use events::EventDispatcher;
pub use session::Session;

pub use lattice_txn::{CommitEvent, SchemaAction, SchemaChangeEvent, TableChangeEvent};
