//! Core types for LatticeDB
//!
//! This crate defines the vocabulary shared by every layer of the engine:
//! - Object identity ([`ObjectName`], [`ObjectType`]) with configurable
//!   case folding
//! - Table schemas ([`TableInfo`], [`ColumnInfo`], [`ConstraintInfo`])
//! - Row identity ([`TableId`], [`RowId`]) and row data
//! - The SQL value sum type ([`Value`]) with tag-dispatched arithmetic,
//!   comparison, and collation-aware string ordering
//! - Expression trees ([`Expr`]) evaluated for CHECK constraints and
//!   column defaults
//! - The error model ([`Error`], [`ErrorCode`]) surfaced to callers and
//!   mapped onto the wire layer
//! - Trait seams for external collaborators ([`QueryPlanNode`],
//!   [`PrivilegeResolver`])
//!
//! Nothing in this crate performs I/O or holds locks; it is pure
//! vocabulary consumed by the store, transaction, and engine crates.

#![warn(clippy::all)]

pub mod error;
pub mod expr;
pub mod object;
pub mod row;
pub mod schema;
pub mod traits;
pub mod value;

pub use error::{Error, ErrorCode, Result, ViolationKind};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use object::{IdentCase, ObjectName, ObjectType};
pub use row::{Row, RowId, TableId};
pub use schema::{ColumnInfo, ConstraintInfo, ConstraintKind, Deferrability, TableInfo};
pub use traits::{AllowAll, PlanContext, Privilege, PrivilegeResolver, QueryPlanNode, RowSet};
pub use value::{
    Collation, CollationStrength, Decomposition, Interval, LobRef, PlanValue, SqlType, Value,
};
