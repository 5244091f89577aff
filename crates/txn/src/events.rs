//! Post-commit event payloads
//!
//! Events are queued on the transaction while it runs and delivered only
//! after the commit pipeline publishes. Each kind has its own payload
//! type so subscribers get a strongly-typed channel instead of a
//! reflective bus.

use lattice_core::{ObjectName, ObjectType, TableId};

/// Rows changed in one table by one commit. Added/removed row numbers
/// appear in registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChangeEvent {
    /// Table name at publish time
    pub table: ObjectName,
    /// Table id
    pub table_id: TableId,
    /// Commit that published the change
    pub commit_id: u64,
    /// Rows added
    pub added: Vec<u64>,
    /// Rows removed
    pub removed: Vec<u64>,
}

/// What a DDL commit did to an object name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaAction {
    /// The object was created
    Created,
    /// The object was dropped
    Dropped,
}

/// An object created or dropped by one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChangeEvent {
    /// Object kind
    pub object_type: ObjectType,
    /// Qualified name
    pub name: ObjectName,
    /// Created or dropped
    pub action: SchemaAction,
    /// Commit that published the change
    pub commit_id: u64,
}

/// Any post-commit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitEvent {
    /// Rows changed in a table
    TableChange(TableChangeEvent),
    /// An object was created or dropped
    SchemaChange(SchemaChangeEvent),
}

impl CommitEvent {
    /// The commit this event belongs to.
    pub fn commit_id(&self) -> u64 {
        match self {
            CommitEvent::TableChange(e) => e.commit_id,
            CommitEvent::SchemaChange(e) => e.commit_id,
        }
    }
}
