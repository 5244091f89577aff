//! Table event registries
//!
//! Every transaction keeps one [`EventRegistry`] per table it mutates: an
//! ordered journal of row additions, removals, and updates, plus a marker
//! for constraint alteration. At commit the registry is sealed under the
//! new commit-id and attached to the table source's history, where later
//! committers test it for clashes.
//!
//! An update is journaled as the pair `UpdateRemove(old)`/`UpdateAdd(new)`
//! in that order. For constraint checking the pair is equivalent to a
//! remove plus an add; keeping the pairing lets foreign-key checks
//! correlate the old and new row.

use lattice_core::TableId;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// One journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableEvent {
    /// Row added
    Add(u64),
    /// Row removed
    Remove(u64),
    /// Old half of an update
    UpdateRemove(u64),
    /// New half of an update; always directly follows its `UpdateRemove`
    UpdateAdd(u64),
    /// The table's constraint set changed in this transaction
    ConstraintsAltered,
}

/// Ordered journal of one transaction's changes to one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRegistry {
    table_id: TableId,
    events: Vec<TableEvent>,
    commit_id: Option<u64>,
}

impl EventRegistry {
    /// Empty registry for `table_id`.
    pub fn new(table_id: TableId) -> Self {
        EventRegistry {
            table_id,
            events: Vec::new(),
            commit_id: None,
        }
    }

    /// The journaled table.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// The commit this registry was published under, once sealed.
    pub fn commit_id(&self) -> Option<u64> {
        self.commit_id
    }

    /// Stamp the registry with its commit-id. After sealing the registry
    /// is immutable and shared through the table source's history.
    pub fn seal(&mut self, commit_id: u64) {
        debug_assert!(self.commit_id.is_none(), "registry sealed twice");
        self.commit_id = Some(commit_id);
    }

    /// Journal a row addition.
    pub fn add_row(&mut self, row: u64) {
        self.events.push(TableEvent::Add(row));
    }

    /// Journal a row removal.
    pub fn remove_row(&mut self, row: u64) {
        self.events.push(TableEvent::Remove(row));
    }

    /// Journal an update as the `UpdateRemove`/`UpdateAdd` pair.
    pub fn update_row(&mut self, old_row: u64, new_row: u64) {
        self.events.push(TableEvent::UpdateRemove(old_row));
        self.events.push(TableEvent::UpdateAdd(new_row));
    }

    /// Journal a constraint alteration.
    pub fn constraints_altered(&mut self) {
        self.events.push(TableEvent::ConstraintsAltered);
    }

    /// The journal, in order.
    pub fn events(&self) -> &[TableEvent] {
        &self.events
    }

    /// Whether nothing was journaled.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether a `ConstraintsAltered` marker is present.
    pub fn has_constraints_altered(&self) -> bool {
        self.events.contains(&TableEvent::ConstraintsAltered)
    }

    /// Multiset of rows added (`Add` + `UpdateAdd`), in journal order.
    pub fn added_rows(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TableEvent::Add(r) | TableEvent::UpdateAdd(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Multiset of rows removed (`Remove` + `UpdateRemove`), in journal
    /// order.
    pub fn removed_rows(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TableEvent::Remove(r) | TableEvent::UpdateRemove(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Added rows minus rows this same transaction also removed, and vice
    /// versa: a row added and then deleted in one transaction cancels out
    /// of constraint checking entirely.
    pub fn normalized_changes(&self) -> (Vec<u64>, Vec<u64>) {
        let added: FxHashSet<u64> = self.added_rows().into_iter().collect();
        let removed: FxHashSet<u64> = self.removed_rows().into_iter().collect();
        let mut net_added: Vec<u64> = added.difference(&removed).copied().collect();
        let mut net_removed: Vec<u64> = removed.difference(&added).copied().collect();
        net_added.sort_unstable();
        net_removed.sort_unstable();
        (net_added, net_removed)
    }

    /// Commit-clash test between two registries for the same table.
    ///
    /// Returns `Some(row)` iff one side's removed set intersects the
    /// other side's touched set (added or removed). Two pure inserts
    /// never clash; two updates or deletes of the same physical row do.
    pub fn test_commit_clash(&self, other: &EventRegistry) -> Option<u64> {
        debug_assert_eq!(self.table_id, other.table_id);

        let self_added: FxHashSet<u64> = self.added_rows().into_iter().collect();
        let self_removed: FxHashSet<u64> = self.removed_rows().into_iter().collect();
        let other_added: FxHashSet<u64> = other.added_rows().into_iter().collect();
        let other_removed: FxHashSet<u64> = other.removed_rows().into_iter().collect();

        for r in &other_removed {
            if self_added.contains(r) || self_removed.contains(r) {
                return Some(*r);
            }
        }
        for r in &self_removed {
            if other_added.contains(r) || other_removed.contains(r) {
                return Some(*r);
            }
        }
        None
    }
}
