//! # LatticeDB
//!
//! An embeddable relational database engine core: serializable
//! transactions with optimistic concurrency control, declarative
//! constraints, table-granularity locking, and a crash-safe paged store.
//!
//! # Quick Start
//!
//! ```no_run
//! use latticedb::{ColumnInfo, ConstraintInfo, ConstraintKind, Database, SqlType, TableInfo, Value};
//!
//! fn main() -> latticedb::Result<()> {
//!     let db = Database::open("./my-data")?;
//!     let mut session = db.session("app");
//!
//!     session.begin_transaction()?;
//!     session.create_table(TableInfo::new(
//!         db.object_name("app.orders"),
//!         vec![
//!             ColumnInfo::new("id", SqlType::Integer).identity(),
//!             ColumnInfo::new("item", SqlType::varchar()).not_null(),
//!         ],
//!         vec![ConstraintInfo::new(
//!             "pk_orders",
//!             ConstraintKind::PrimaryKey { columns: vec!["id".into()] },
//!         )],
//!     )?)?;
//!     session.insert("app.orders", vec![None, Some(Value::String("apples".into()))])?;
//!     session.commit()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | Crate | Concern |
//! |-------|---------|
//! | `lattice-core` | Object names, schemas, SQL values, expressions, errors |
//! | `lattice-store` | Paged area store (memory + crash-safe file), table state store |
//! | `lattice-txn` | Registries, copy-on-write index sets, table sources, transactions, locks, constraints, the commit pipeline |
//! | `lattice-engine` | Database handle, sessions, catalog, post-commit events |
//!
//! Concurrent transactions validate at commit: the pipeline checks for
//! dirty selects, namespace clashes, and row conflicts, re-runs deferred
//! constraints against a synthetic post-commit view, and publishes under
//! a single monotonic commit-id. Conflict errors
//! ([`Error::is_commit_conflict`]) are retryable by replaying the
//! transaction.

pub use lattice_core::{
    AllowAll, BinaryOp, Collation, CollationStrength, ColumnInfo, ConstraintInfo, ConstraintKind,
    Deferrability, Error, ErrorCode, Expr, IdentCase, Interval, ObjectName, ObjectType,
    PlanContext, Privilege, PrivilegeResolver, QueryPlanNode, Result, Row, RowId, RowSet, SqlType,
    TableId, TableInfo, UnaryOp, Value, ViolationKind,
};

pub use lattice_engine::{
    Catalog, CatalogObject, Database, DatabaseBuilder, DatabaseConfig, EventDispatcher,
    SchemaAction, SchemaChangeEvent, SequenceDef, Session, TableChangeEvent, TriggerDef,
    TriggerOn, ViewDef,
};

pub use lattice_txn::{IsolationLevel, LockManager, LockMode, Transaction, TxState};
