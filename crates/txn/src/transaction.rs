//! Transactions
//!
//! A [`Transaction`] is a begin-time snapshot of the visible tables plus
//! everything the transaction accumulates: per-table mutable views with
//! their journals, the set of objects created and dropped, the tables it
//! selected from (for dirty-select checking), and queued post-commit
//! events.
//!
//! Each transaction is single-threaded by contract, so the API takes
//! `&mut self` and needs no internal locking. Snapshot isolation holds by
//! construction: the visible map is captured under the commit mutex at
//! begin, and reads go to the transaction's own mutable view once a table
//! is touched (read-your-writes).
//!
//! # State machine
//!
//! ```text
//! Open ──▶ Committing ──▶ Committed
//!   │           │
//!   │           └───────▶ Aborted
//!   └────▶ RollingBack ──▶ Aborted
//! ```
//!
//! Once the transaction leaves `Open`, every mutating operation fails
//! with `InvalidState`.

use crate::events::CommitEvent;
use crate::registry::EventRegistry;
use crate::source::{CommittedState, MutableTable, TableSource, TableView};
use lattice_core::{Error, ObjectName, ObjectType, Result, TableId, TableInfo};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Transaction isolation. The engine runs everything serializable; the
/// enum exists so the session surface can state it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Full serializable isolation (the only supported level)
    #[default]
    Serializable,
}

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting reads and writes
    Open,
    /// Inside the commit pipeline; no further mutation accepted
    Committing,
    /// Published
    Committed,
    /// Rollback in progress
    RollingBack,
    /// Terminal failure state (rolled back or failed commit)
    Aborted,
}

/// One table as captured at transaction begin: the pinned source plus
/// the committed state `Arc`s of that moment.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    /// Pinned source (keeps a dropped table reachable until release)
    pub source: Arc<TableSource>,
    /// Committed state at begin
    pub committed: CommittedState,
}

impl TableSnapshot {
    /// Snapshot of `source`'s current committed state.
    pub fn capture(source: &Arc<TableSource>) -> Self {
        TableSnapshot {
            source: source.clone(),
            committed: source.committed(),
        }
    }
}

/// A transaction over the table set visible at its begin commit-id.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    begin_commit_id: u64,
    isolation: IsolationLevel,
    state: TxState,
    read_only: bool,

    visible: FxHashMap<ObjectName, TableSnapshot>,
    touched: BTreeMap<u64, MutableTable>,
    read_tables: FxHashSet<u64>,

    created: Vec<(ObjectType, ObjectName)>,
    dropped: Vec<(ObjectType, ObjectName)>,
    created_sources: Vec<Arc<TableSource>>,
    cancelled_sources: Vec<Arc<TableSource>>,
    dropped_tables: FxHashMap<u64, Arc<TableSource>>,
    discarded: Vec<(Arc<TableSource>, EventRegistry)>,
    constraint_altered: FxHashSet<u64>,
    queued_events: Vec<CommitEvent>,
}

impl Transaction {
    /// Build a transaction over a begin-time snapshot. Called by the
    /// commit manager under the commit mutex.
    pub fn new(
        id: u64,
        begin_commit_id: u64,
        visible: impl IntoIterator<Item = (ObjectName, TableSnapshot)>,
    ) -> Self {
        Transaction {
            id,
            begin_commit_id,
            isolation: IsolationLevel::Serializable,
            state: TxState::Open,
            read_only: false,
            visible: visible.into_iter().collect(),
            touched: BTreeMap::new(),
            read_tables: FxHashSet::default(),
            created: Vec::new(),
            dropped: Vec::new(),
            created_sources: Vec::new(),
            cancelled_sources: Vec::new(),
            dropped_tables: FxHashMap::default(),
            discarded: Vec::new(),
            constraint_altered: FxHashSet::default(),
            queued_events: Vec::new(),
        }
    }

    /// Transaction id (diagnostics only).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The commit-id snapshot this transaction reads at.
    pub fn begin_commit_id(&self) -> u64 {
        self.begin_commit_id
    }

    /// Isolation level (always serializable).
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Whether mutations are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Latch the transaction read-only. Mutating operations fail from
    /// here on; the flag cannot be cleared.
    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == TxState::Open {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "transaction {} is {:?}",
                self.id, self.state
            )))
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    // === Table access ===

    /// Names of all tables visible to this transaction.
    pub fn table_names(&self) -> Vec<ObjectName> {
        self.visible.keys().cloned().collect()
    }

    /// Whether `name` resolves to a visible table.
    pub fn table_exists(&self, name: &ObjectName) -> bool {
        self.visible.contains_key(name)
    }

    /// The begin-time snapshot of a visible table.
    pub fn snapshot(&self, name: &ObjectName) -> Option<&TableSnapshot> {
        self.visible.get(name)
    }

    /// Every visible table with the schema this transaction sees for it
    /// (in-transaction ALTERs included).
    pub fn visible_tables(&self) -> Vec<(ObjectName, Arc<TableInfo>)> {
        self.visible
            .iter()
            .map(|(name, snap)| {
                let info = self
                    .touched
                    .get(&snap.source.table_id().0)
                    .map(|mt| mt.table_info().clone())
                    .unwrap_or_else(|| snap.committed.info.clone());
                (name.clone(), info)
            })
            .collect()
    }

    /// Read view over a table without recording a select. Reads the
    /// transaction's own mutable view once the table is touched.
    pub fn view(&self, name: &ObjectName) -> Result<Box<dyn TableView + '_>> {
        let snap = self
            .visible
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("table '{name}'")))?;
        let table_id = snap.source.table_id().0;
        if let Some(mutable) = self.touched.get(&table_id) {
            Ok(Box::new(mutable))
        } else {
            Ok(Box::new(crate::source::SnapshotTable::new(
                snap.source.clone(),
                snap.committed.clone(),
            )))
        }
    }

    /// Read view that records the select for dirty-select checking.
    pub fn table(&mut self, name: &ObjectName) -> Result<Box<dyn TableView + '_>> {
        self.ensure_open()?;
        let snap = self
            .visible
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("table '{name}'")))?;
        self.read_tables.insert(snap.source.table_id().0);
        self.view(name)
    }

    /// The mutable view of a table, creating it (and its registry and
    /// copy-on-write index set) on first touch.
    pub fn mutable_table(&mut self, name: &ObjectName) -> Result<&mut MutableTable> {
        self.ensure_writable()?;
        let snap = self
            .visible
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("table '{name}'")))?;
        let table_id = snap.source.table_id();
        if !self.touched.contains_key(&table_id.0) {
            let mutable = snap
                .source
                .get_mutable_table(&snap.committed, EventRegistry::new(table_id));
            self.touched.insert(table_id.0, mutable);
        }
        Ok(self
            .touched
            .get_mut(&table_id.0)
            .expect("inserted just above"))
    }

    // === Visible-set maintenance (DDL and the commit pipeline) ===

    /// Attach a table snapshot under its name.
    pub fn attach_table(&mut self, snapshot: TableSnapshot) {
        self.visible
            .insert(snapshot.committed.info.name().clone(), snapshot);
    }

    /// Replace a table's snapshot (check-view merging, ALTER publish).
    pub fn update_visible_table(&mut self, snapshot: TableSnapshot) {
        self.attach_table(snapshot);
    }

    /// Detach a table from the visible set.
    pub fn remove_visible_table(&mut self, name: &ObjectName) -> Result<TableSnapshot> {
        self.visible
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("table '{name}'")))
    }

    /// Register a table created by this transaction: it becomes visible
    /// (and writable) immediately inside the transaction, and is recorded
    /// for namespace conflict checking and publish.
    pub fn create_table(&mut self, source: Arc<TableSource>) -> Result<()> {
        self.ensure_writable()?;
        let name = source.name();
        if self.visible.contains_key(&name) {
            return Err(Error::InvalidState(format!("table '{name}' already exists")));
        }
        self.created.push((ObjectType::Table, name));
        self.created_sources.push(source.clone());
        self.attach_table(TableSnapshot::capture(&source));
        Ok(())
    }

    /// Drop a table. Dropping a table created by this same transaction
    /// cancels the creation and leaves no trace; otherwise the drop is
    /// recorded for conflict checking and publish.
    pub fn drop_table(&mut self, name: &ObjectName) -> Result<()> {
        self.ensure_writable()?;
        let snapshot = self.remove_visible_table(name)?;
        let table_id = snapshot.source.table_id();

        if let Some(mutable) = self.touched.remove(&table_id.0) {
            let source = mutable.source().clone();
            self.discarded.push((source, mutable.into_registry()));
        }
        self.constraint_altered.remove(&table_id.0);

        let created_here = self
            .created
            .iter()
            .position(|(ty, n)| *ty == ObjectType::Table && n == name);
        if let Some(pos) = created_here {
            self.created.remove(pos);
            if let Some(cancelled_pos) = self
                .created_sources
                .iter()
                .position(|s| s.table_id() == table_id)
            {
                // Staged rows are discarded with the journal above; the
                // source's area is reclaimed at transaction end.
                let source = self.created_sources.remove(cancelled_pos);
                self.cancelled_sources.push(source);
            }
            return Ok(());
        }

        self.dropped.push((ObjectType::Table, name.clone()));
        self.dropped_tables.insert(table_id.0, snapshot.source);
        Ok(())
    }

    /// Record DDL on a non-table object (view, sequence, trigger).
    pub fn add_created(&mut self, object_type: ObjectType, name: ObjectName) -> Result<()> {
        self.ensure_writable()?;
        self.created.push((object_type, name));
        Ok(())
    }

    /// Record a drop of a non-table object. Dropping an object created
    /// by this same transaction cancels the creation.
    pub fn add_dropped(&mut self, object_type: ObjectType, name: ObjectName) -> Result<()> {
        self.ensure_writable()?;
        if let Some(pos) = self
            .created
            .iter()
            .position(|(ty, n)| *ty == object_type && *n == name)
        {
            self.created.remove(pos);
            return Ok(());
        }
        self.dropped.push((object_type, name));
        Ok(())
    }

    /// Mark a table's constraints altered; commit re-validates the whole
    /// table.
    pub fn mark_constraints_altered(&mut self, table_id: TableId) {
        self.constraint_altered.insert(table_id.0);
    }

    /// Queue an event for delivery after a successful commit.
    pub fn raise_event(&mut self, event: CommitEvent) -> Result<()> {
        self.ensure_open()?;
        self.queued_events.push(event);
        Ok(())
    }

    /// Check added rows of a table against the deferrability-filtered
    /// constraint set, as this transaction sees the table.
    pub fn check_add_constraint_violations(
        &self,
        table: &ObjectName,
        rows: &[u64],
        deferrability: lattice_core::Deferrability,
    ) -> Result<()> {
        crate::constraints::check_add_violations(self, table, rows, deferrability)
    }

    /// Check removed rows of a table: no surviving row may still
    /// reference them through a foreign key.
    pub fn check_remove_constraint_violations(
        &self,
        table: &ObjectName,
        rows: &[u64],
        deferrability: lattice_core::Deferrability,
    ) -> Result<()> {
        crate::constraints::check_remove_violations(self, table, rows, deferrability)
    }

    // === Pipeline accessors ===

    /// Tables this transaction selected from.
    pub fn read_tables(&self) -> &FxHashSet<u64> {
        &self.read_tables
    }

    /// Mutable views of the touched tables, ascending by table id.
    pub fn touched_tables(&self) -> &BTreeMap<u64, MutableTable> {
        &self.touched
    }

    /// Mutable access for the commit pipeline.
    pub fn touched_tables_mut(&mut self) -> &mut BTreeMap<u64, MutableTable> {
        &mut self.touched
    }

    /// Objects created by this transaction.
    pub fn created_objects(&self) -> &[(ObjectType, ObjectName)] {
        &self.created
    }

    /// Objects dropped by this transaction.
    pub fn dropped_objects(&self) -> &[(ObjectType, ObjectName)] {
        &self.dropped
    }

    /// Sources created by this transaction.
    pub fn created_sources(&self) -> &[Arc<TableSource>] {
        &self.created_sources
    }

    /// Sources created and then dropped within this transaction; their
    /// areas are reclaimed at transaction end.
    pub fn cancelled_sources(&self) -> &[Arc<TableSource>] {
        &self.cancelled_sources
    }

    /// Sources of tables dropped by this transaction, by table id.
    pub fn dropped_table_sources(&self) -> &FxHashMap<u64, Arc<TableSource>> {
        &self.dropped_tables
    }

    /// Journals of tables mutated and then dropped within this
    /// transaction; their staged rows still need discarding at the end.
    pub fn discarded_registries(&self) -> &[(Arc<TableSource>, EventRegistry)] {
        &self.discarded
    }

    /// Table ids whose constraints were altered.
    pub fn constraint_altered_tables(&self) -> &FxHashSet<u64> {
        &self.constraint_altered
    }

    /// Drain the queued events.
    pub fn take_queued_events(&mut self) -> Vec<CommitEvent> {
        std::mem::take(&mut self.queued_events)
    }

    // === State transitions ===

    /// `Open → Committing`.
    pub fn begin_commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = TxState::Committing;
        Ok(())
    }

    /// `Committing → Committed`.
    pub fn complete_commit(&mut self) {
        debug_assert_eq!(self.state, TxState::Committing);
        self.state = TxState::Committed;
    }

    /// `Committing → Aborted`.
    pub fn fail_commit(&mut self) {
        debug_assert_eq!(self.state, TxState::Committing);
        self.state = TxState::Aborted;
    }

    /// `Open → RollingBack`.
    pub fn begin_rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = TxState::RollingBack;
        Ok(())
    }

    /// `RollingBack → Aborted`.
    pub fn complete_rollback(&mut self) {
        debug_assert_eq!(self.state, TxState::RollingBack);
        self.state = TxState::Aborted;
    }
}
