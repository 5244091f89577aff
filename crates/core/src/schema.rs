//! Table schemas and constraints
//!
//! [`TableInfo`] is the published shape of a table: columns plus
//! declarative constraints. Published infos are immutable and shared via
//! `Arc`; an ALTER builds a new version and the transaction marks the
//! table constraint-altered so commit re-validates the full table.

use crate::error::{Error, Result, ViolationKind};
use crate::expr::Expr;
use crate::object::ObjectName;
use crate::value::SqlType;
use serde::{Deserialize, Serialize};

/// When a constraint is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Deferrability {
    /// After every statement
    #[default]
    InitiallyImmediate,
    /// At commit
    InitiallyDeferred,
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name (already case-folded)
    pub name: String,
    /// SQL type, including any collation
    pub sql_type: SqlType,
    /// Whether NULL is storable
    pub nullable: bool,
    /// Default expression applied when an insert omits the column
    pub default: Option<Expr>,
    /// Whether values come from the table's identity sequence
    pub identity: bool,
}

impl ColumnInfo {
    /// Plain nullable column with no default.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        ColumnInfo {
            name: name.into(),
            sql_type,
            nullable: true,
            default: None,
            identity: false,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Attach a default expression.
    pub fn with_default(mut self, expr: Expr) -> Self {
        self.default = Some(expr);
        self
    }

    /// Mark the column as identity-generated.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self.nullable = false;
        self
    }
}

/// The body of a declarative constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// PRIMARY KEY over the named columns (unique + not null)
    PrimaryKey {
        /// Key columns, in declaration order
        columns: Vec<String>,
    },
    /// UNIQUE over the named columns (null keys exempt)
    Unique {
        /// Key columns, in declaration order
        columns: Vec<String>,
    },
    /// FOREIGN KEY from `columns` to `ref_columns` of `ref_table`
    ForeignKey {
        /// Referencing columns in this table
        columns: Vec<String>,
        /// Referenced (parent) table
        ref_table: ObjectName,
        /// Referenced columns in the parent
        ref_columns: Vec<String>,
    },
    /// CHECK expression; fails only when it evaluates to FALSE
    Check {
        /// The checked expression
        expr: Expr,
    },
}

impl ConstraintKind {
    /// The violation kind raised when this constraint fails.
    pub fn violation_kind(&self) -> ViolationKind {
        match self {
            ConstraintKind::PrimaryKey { .. } => ViolationKind::PrimaryKey,
            ConstraintKind::Unique { .. } => ViolationKind::Unique,
            ConstraintKind::ForeignKey { .. } => ViolationKind::ForeignKey,
            ConstraintKind::Check { .. } => ViolationKind::Check,
        }
    }
}

/// A named constraint with its checking time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    /// Constraint name, unique within the table
    pub name: String,
    /// What is enforced
    pub kind: ConstraintKind,
    /// When it is enforced
    pub deferrability: Deferrability,
}

impl ConstraintInfo {
    /// Immediate constraint.
    pub fn new(name: impl Into<String>, kind: ConstraintKind) -> Self {
        ConstraintInfo {
            name: name.into(),
            kind,
            deferrability: Deferrability::InitiallyImmediate,
        }
    }

    /// Make the constraint deferred to commit.
    pub fn deferred(mut self) -> Self {
        self.deferrability = Deferrability::InitiallyDeferred;
        self
    }
}

/// Published table shape: `(name, columns, constraints)`. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    name: ObjectName,
    columns: Vec<ColumnInfo>,
    constraints: Vec<ConstraintInfo>,
}

impl TableInfo {
    /// Build a table info, validating internal consistency: at least one
    /// column, unique column and constraint names, constraint columns
    /// resolvable.
    pub fn new(
        name: ObjectName,
        columns: Vec<ColumnInfo>,
        constraints: Vec<ConstraintInfo>,
    ) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::InvalidState(format!(
                "table '{name}' has no columns"
            )));
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(Error::InvalidState(format!(
                    "duplicate column '{}' in table '{name}'",
                    col.name
                )));
            }
        }
        let info = TableInfo {
            name,
            columns,
            constraints: Vec::new(),
        };
        let mut info = info;
        for c in constraints {
            info.push_constraint(c)?;
        }
        Ok(info)
    }

    fn push_constraint(&mut self, c: ConstraintInfo) -> Result<()> {
        if self.constraints.iter().any(|x| x.name == c.name) {
            return Err(Error::InvalidState(format!(
                "duplicate constraint '{}' in table '{}'",
                c.name, self.name
            )));
        }
        let key_columns: &[String] = match &c.kind {
            ConstraintKind::PrimaryKey { columns } | ConstraintKind::Unique { columns } => columns,
            ConstraintKind::ForeignKey { columns, .. } => columns,
            ConstraintKind::Check { .. } => &[],
        };
        for col in key_columns {
            if self.column_index(col).is_none() {
                return Err(Error::InvalidState(format!(
                    "constraint '{}' names unknown column '{}' in table '{}'",
                    c.name, col, self.name
                )));
            }
        }
        self.constraints.push(c);
        Ok(())
    }

    /// Qualified table name.
    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Constraints in declaration order.
    pub fn constraints(&self) -> &[ConstraintInfo] {
        &self.constraints
    }

    /// Position of the named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The primary key constraint, if declared.
    pub fn primary_key(&self) -> Option<&ConstraintInfo> {
        self.constraints
            .iter()
            .find(|c| matches!(c.kind, ConstraintKind::PrimaryKey { .. }))
    }

    /// Derive a new version with different constraints (ALTER). The
    /// columns stay; callers mark the table constraint-altered in their
    /// transaction so the whole table is re-validated at commit.
    pub fn with_constraints(&self, constraints: Vec<ConstraintInfo>) -> Result<TableInfo> {
        TableInfo::new(self.name.clone(), self.columns.clone(), constraints)
    }
}
