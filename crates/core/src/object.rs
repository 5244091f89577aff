//! Qualified object names
//!
//! Every schema object (table, view, sequence, trigger, index) is
//! identified by a `(schema, name)` pair. Name equality is case-sensitive
//! or case-insensitive per database configuration; folding happens once at
//! construction so the rest of the engine compares names bytewise.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier case handling, fixed per database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IdentCase {
    /// Identifiers compare exactly as written
    #[default]
    Sensitive,
    /// Identifiers are folded to lower case at construction
    Insensitive,
}

/// The kinds of schema object the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// Base table backed by a table source
    Table,
    /// Named query definition
    View,
    /// Monotonic value generator
    Sequence,
    /// Post-commit change handler
    Trigger,
    /// Secondary index
    Index,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectType::Table => "table",
            ObjectType::View => "view",
            ObjectType::Sequence => "sequence",
            ObjectType::Trigger => "trigger",
            ObjectType::Index => "index",
        };
        f.write_str(s)
    }
}

/// A qualified `(schema, name)` identifier. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectName {
    schema: String,
    name: String,
}

impl ObjectName {
    /// Create a name without case folding.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectName {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Create a name, folding per the database's identifier case rule.
    pub fn with_case(schema: impl Into<String>, name: impl Into<String>, case: IdentCase) -> Self {
        let (schema, name) = (schema.into(), name.into());
        match case {
            IdentCase::Sensitive => ObjectName { schema, name },
            IdentCase::Insensitive => ObjectName {
                schema: schema.to_lowercase(),
                name: name.to_lowercase(),
            },
        }
    }

    /// Parse a dotted `"schema.name"` string. A bare name lands in the
    /// `"app"` default schema.
    pub fn parse(qualified: &str, case: IdentCase) -> Self {
        match qualified.split_once('.') {
            Some((schema, name)) => Self::with_case(schema, name, case),
            None => Self::with_case("app", qualified, case),
        }
    }

    /// Schema component.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Name component.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}
