//! Trait seams for external collaborators
//!
//! The SQL planner, the privilege manager, and the wire layer live outside
//! this repository. The core consumes them through these traits and hands
//! back the transactional surfaces defined in the `lattice-txn` and
//! `lattice-engine` crates.

use crate::object::{ObjectName, ObjectType};
use crate::row::Row;
use crate::schema::ColumnInfo;
use std::fmt;

/// A materialized sub-query result: schema plus rows.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    /// Result columns
    pub columns: Vec<ColumnInfo>,
    /// Result rows, one `Value` per column
    pub rows: Vec<Row>,
}

impl RowSet {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Evaluation context handed to a query plan.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    /// Session user evaluating the plan
    pub user: String,
    /// Positional parameters bound by the caller
    pub params: Vec<crate::value::Value>,
}

/// An evaluable query plan produced by the external planner.
///
/// The core calls [`evaluate`](QueryPlanNode::evaluate) to materialize
/// sub-queries during constraint checks and view DDL; it never inspects
/// the plan's structure.
pub trait QueryPlanNode: Send + Sync {
    /// Materialize the plan into rows.
    fn evaluate(&self, ctx: &PlanContext) -> crate::error::Result<RowSet>;
}

impl fmt::Debug for dyn QueryPlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryPlanNode")
    }
}

/// Privileges the core asks about before publishing DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    /// Read rows
    Select,
    /// Add rows
    Insert,
    /// Change rows
    Update,
    /// Remove rows
    Delete,
    /// Create an object in a schema
    Create,
    /// Drop an object
    Drop,
    /// Alter an object's definition
    Alter,
    /// Reference an object from a foreign key
    References,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::Create => "CREATE",
            Privilege::Drop => "DROP",
            Privilege::Alter => "ALTER",
            Privilege::References => "REFERENCES",
        };
        f.write_str(s)
    }
}

/// Callback into the external privilege manager. The core does not own
/// the privilege tables; it only asks.
pub trait PrivilegeResolver: Send + Sync {
    /// Whether `user` holds `privilege` on the named object.
    fn user_has_privilege(
        &self,
        user: &str,
        object_type: ObjectType,
        object_name: &ObjectName,
        privilege: Privilege,
    ) -> bool;
}

/// Resolver granting everything; the default for embedded use where the
/// host application is the only principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PrivilegeResolver for AllowAll {
    fn user_has_privilege(
        &self,
        _user: &str,
        _object_type: ObjectType,
        _object_name: &ObjectName,
        _privilege: Privilege,
    ) -> bool {
        true
    }
}
