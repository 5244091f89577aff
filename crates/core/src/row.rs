//! Row identity
//!
//! Tables are numbered by the table state store with ids that are never
//! reused; rows are numbered densely within a table by the table source.
//! A [`RowId`] pairs the two into a database-wide physical row address.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Table id assigned by the state store. Monotonic, never recycled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Physical row address: `(table-id, row-number)`.
///
/// Row numbers are dense within a table but never recycled while any open
/// transaction may still reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId {
    /// Owning table
    pub table: TableId,
    /// Row number within the table
    pub row: u64,
}

impl RowId {
    /// Create a row id.
    pub fn new(table: TableId, row: u64) -> Self {
        RowId { table, row }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.row)
    }
}

/// A materialized row: one [`Value`] per column, in schema order.
pub type Row = Vec<Value>;
