//! Table sources
//!
//! A [`TableSource`] is the persistent master record of one table: its
//! published schema, the committed row-existence bitmap, the committed
//! index snapshot, a pool of row data (committed rows plus rows staged by
//! open transactions), and the history of committed registries used to
//! answer "what changed since commit X?".
//!
//! Committed state is held as `Arc`s swapped atomically under the commit
//! mutex, so a transaction's begin-time snapshot is a handful of `Arc`
//! clones and stays stable however many commits land afterwards.
//!
//! Row numbers are allocated from the source's monotonic counter the
//! moment a transaction stages a row, and row data enters the shared pool
//! immediately. Nothing becomes *visible* until the commit pipeline
//! applies the transaction's registry to the committed bitmap; a rollback
//! just discards the staged rows.

use crate::indexset::{IndexKey, IndexSetSnapshot, TransactionIndexSet};
use crate::registry::{EventRegistry, TableEvent};
use dashmap::DashMap;
use lattice_core::{Error, ObjectName, Result, Row, RowId, TableId, TableInfo, Value};
use lattice_store::{Area, AreaId, AreaStore};
use parking_lot::{Mutex, RwLock};
use roaring::RoaringTreemap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// The committed state of a table at one commit: schema, row bitmap,
/// index snapshot. Cloning is three `Arc` bumps.
#[derive(Debug, Clone)]
pub struct CommittedState {
    /// Published schema
    pub info: Arc<TableInfo>,
    /// Visible row numbers
    pub visible: Arc<RoaringTreemap>,
    /// Committed indexes
    pub indexes: Arc<IndexSetSnapshot>,
}

impl CommittedState {
    fn empty(info: Arc<TableInfo>) -> Self {
        let indexes = Arc::new(IndexSetSnapshot::for_info(&info));
        CommittedState {
            info,
            visible: Arc::new(RoaringTreemap::new()),
            indexes,
        }
    }
}

/// Read access to one table as some transaction sees it.
pub trait TableView {
    /// The schema this view is laid out under.
    fn info(&self) -> &TableInfo;

    /// Whether `row` is visible in this view.
    fn contains_row(&self, row: u64) -> bool;

    /// Row data by number. Present for any staged or committed row the
    /// pool still holds, visible or not.
    fn row(&self, row: u64) -> Option<Arc<Row>>;

    /// Number of visible rows.
    fn row_count(&self) -> u64;

    /// Visible row numbers in ascending order.
    fn row_numbers(&self) -> Vec<u64>;

    /// Visible rows whose key over `columns` equals `key`. Uses an index
    /// when one covers the columns, otherwise scans.
    fn index_lookup(&self, columns: &[usize], key: &IndexKey) -> Vec<u64>;
}

fn scan_lookup<V: TableView + ?Sized>(view: &V, columns: &[usize], key: &IndexKey) -> Vec<u64> {
    view.row_numbers()
        .into_iter()
        .filter(|&r| {
            view.row(r)
                .map(|data| IndexKey::from_row(&data, columns, view.info()) == *key)
                .unwrap_or(false)
        })
        .collect()
}

/// On-disk record of a table source, bincode-framed inside its area.
#[derive(Serialize, Deserialize)]
struct SourceRecord {
    table_id: u64,
    info: TableInfo,
    next_row: u64,
    next_identity: i64,
    visible: Vec<u8>,
    rows: Vec<(u64, Row)>,
}

#[derive(Debug)]
struct SourceInner {
    committed: CommittedState,
    rows: FxHashMap<u64, Arc<Row>>,
    history: Vec<(u64, Arc<EventRegistry>)>,
    tombstones: Vec<(u64, Vec<u64>)>,
}

/// Persistent per-table master record.
pub struct TableSource {
    table_id: TableId,
    store: Arc<dyn AreaStore>,
    area: Area,
    next_row: AtomicU64,
    next_identity: AtomicI64,
    inner: RwLock<SourceInner>,
}

impl std::fmt::Debug for TableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSource")
            .field("table_id", &self.table_id)
            .field("name", &self.name())
            .finish()
    }
}

impl TableSource {
    /// Create a fresh source backed by a new area. The caller persists
    /// the id→area mapping through the [`SourceDirectory`].
    pub fn create(
        store: Arc<dyn AreaStore>,
        table_id: TableId,
        info: Arc<TableInfo>,
    ) -> Result<Arc<TableSource>> {
        let area = store.create_area(0)?;
        let source = Arc::new(TableSource {
            table_id,
            store,
            area,
            next_row: AtomicU64::new(0),
            next_identity: AtomicI64::new(1),
            inner: RwLock::new(SourceInner {
                committed: CommittedState::empty(info),
                rows: FxHashMap::default(),
                history: Vec::new(),
                tombstones: Vec::new(),
            }),
        });
        source.persist()?;
        Ok(source)
    }

    /// Load a source from its area, rebuilding the committed index
    /// snapshot from the stored rows.
    pub fn open(
        store: Arc<dyn AreaStore>,
        table_id: TableId,
        area_id: AreaId,
    ) -> Result<Arc<TableSource>> {
        let area = store.get_area(area_id, true)?;
        let record: SourceRecord = bincode::deserialize(&area.read_all())?;
        if record.table_id != table_id.0 {
            return Err(Error::Corruption(format!(
                "source record in {area_id} names table {}, expected {table_id}",
                record.table_id
            )));
        }
        let visible = RoaringTreemap::deserialize_from(&record.visible[..])
            .map_err(|e| Error::Corruption(format!("row bitmap for {table_id}: {e}")))?;
        let info = Arc::new(record.info);

        let rows: FxHashMap<u64, Arc<Row>> = record
            .rows
            .into_iter()
            .map(|(n, row)| (n, Arc::new(row)))
            .collect();

        let mut rebuilt = TransactionIndexSet::new(Arc::new(IndexSetSnapshot::for_info(&info)));
        rebuilt.rebuild(
            &info,
            visible
                .iter()
                .filter_map(|n| rows.get(&n).map(|row| (n, &**row))),
        );
        let indexes = rebuilt.flush();

        Ok(Arc::new(TableSource {
            table_id,
            store,
            area,
            next_row: AtomicU64::new(record.next_row),
            next_identity: AtomicI64::new(record.next_identity),
            inner: RwLock::new(SourceInner {
                committed: CommittedState {
                    info,
                    visible: Arc::new(visible),
                    indexes,
                },
                rows,
                history: Vec::new(),
                tombstones: Vec::new(),
            }),
        }))
    }

    /// The table's id.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// The area backing this source.
    pub fn area_id(&self) -> AreaId {
        self.area.id()
    }

    /// The published table name.
    pub fn name(&self) -> ObjectName {
        self.inner.read().committed.info.name().clone()
    }

    /// The published schema.
    pub fn table_info(&self) -> Arc<TableInfo> {
        self.inner.read().committed.info.clone()
    }

    /// The current committed state (three `Arc` clones).
    pub fn committed(&self) -> CommittedState {
        self.inner.read().committed.clone()
    }

    /// Next identity value for the table's identity column.
    pub fn next_identity_value(&self) -> i64 {
        self.next_identity.fetch_add(1, Ordering::SeqCst)
    }

    /// Stage row data in the shared pool under a fresh row number.
    pub fn allocate_row(&self, data: Arc<Row>) -> u64 {
        let row = self.next_row.fetch_add(1, Ordering::SeqCst);
        self.inner.write().rows.insert(row, data);
        row
    }

    /// Row data by number, staged or committed.
    pub fn row(&self, row: u64) -> Option<Arc<Row>> {
        self.inner.read().rows.get(&row).cloned()
    }

    /// Build the transaction-bound mutable view over `state`, journaling
    /// every mutation into `registry`.
    pub fn get_mutable_table(
        self: &Arc<Self>,
        state: &CommittedState,
        registry: EventRegistry,
    ) -> MutableTable {
        debug_assert_eq!(registry.table_id(), self.table_id);
        MutableTable {
            source: self.clone(),
            info: state.info.clone(),
            visible: (*state.visible).clone(),
            indexes: TransactionIndexSet::new(state.indexes.clone()),
            registry,
        }
    }

    /// Registries committed with id `>= commit_id`, in commit order.
    pub fn find_changes_since(&self, commit_id: u64) -> Vec<Arc<EventRegistry>> {
        self.inner
            .read()
            .history
            .iter()
            .filter(|(c, _)| *c >= commit_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Publish one transaction's changes: append the sealed registry
    /// under `new_commit_id`, adopt `indexes` as the committed snapshot,
    /// apply the add/remove marks to the row bitmap, and install a new
    /// schema version if the transaction altered constraints.
    pub fn commit_transaction_change(
        &self,
        new_commit_id: u64,
        registry: Arc<EventRegistry>,
        indexes: Arc<IndexSetSnapshot>,
        new_info: Option<Arc<TableInfo>>,
    ) {
        let mut inner = self.inner.write();
        let mut bitmap = (*inner.committed.visible).clone();
        for r in registry.added_rows() {
            bitmap.insert(r);
        }
        let removed = registry.removed_rows();
        for r in &removed {
            bitmap.remove(*r);
        }
        inner.committed = CommittedState {
            info: new_info.unwrap_or_else(|| inner.committed.info.clone()),
            visible: Arc::new(bitmap),
            indexes,
        };
        inner.history.push((new_commit_id, registry));
        if !removed.is_empty() {
            inner.tombstones.push((new_commit_id, removed));
        }
        debug!(table = %self.table_id, commit_id = new_commit_id, "table change committed");
    }

    /// Discard a never-committed registry: staged row data for its added
    /// rows leaves the pool; the committed state is untouched.
    pub fn rollback_transaction_change(&self, registry: &EventRegistry) {
        let mut inner = self.inner.write();
        for r in registry.added_rows() {
            inner.rows.remove(&r);
        }
    }

    /// Drop history and tombstoned row data no open transaction can
    /// reach: registries and tombstones with commit-id `<=
    /// min_open_begin` are only visible to transactions that began
    /// earlier, and none remain.
    pub fn truncate_history(&self, min_open_begin: u64) {
        let mut inner = self.inner.write();
        inner.history.retain(|(c, _)| *c > min_open_begin);
        let (reclaim, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.tombstones)
            .into_iter()
            .partition(|(c, _)| *c <= min_open_begin);
        inner.tombstones = keep;
        for (_, rows) in reclaim {
            for r in rows {
                inner.rows.remove(&r);
            }
        }
    }

    /// Serialize the committed state into the source's area. Runs inside
    /// the commit pipeline's publish stage; durability comes from the
    /// store flush that follows.
    pub fn persist(&self) -> Result<()> {
        let inner = self.inner.read();
        let mut visible_bytes = Vec::new();
        inner
            .committed
            .visible
            .serialize_into(&mut visible_bytes)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let rows: Vec<(u64, Row)> = inner
            .committed
            .visible
            .iter()
            .filter_map(|r| inner.rows.get(&r).map(|data| (r, (**data).clone())))
            .collect();
        let record = SourceRecord {
            table_id: self.table_id.0,
            info: (*inner.committed.info).clone(),
            next_row: self.next_row.load(Ordering::SeqCst),
            next_identity: self.next_identity.load(Ordering::SeqCst),
            visible: visible_bytes,
            rows,
        };
        self.area.replace(&bincode::serialize(&record)?)
    }

    /// Rebuild a transaction's journal against `base` (the current
    /// committed state): re-applies each event using the staged row data,
    /// producing the merged view the commit pipeline validates.
    pub fn replay_mutable(
        self: &Arc<Self>,
        base: &CommittedState,
        events: &[TableEvent],
    ) -> Result<MutableTable> {
        let mut merged = self.get_mutable_table(base, EventRegistry::new(self.table_id));
        for event in events {
            match event {
                TableEvent::Add(r) | TableEvent::UpdateAdd(r) => {
                    let data = self.row(*r).ok_or_else(|| {
                        Error::InvalidState(format!(
                            "staged row {} missing during replay",
                            RowId::new(self.table_id, *r)
                        ))
                    })?;
                    merged.visible.insert(*r);
                    merged.indexes.insert_row(*r, &data, &merged.info);
                }
                TableEvent::Remove(r) | TableEvent::UpdateRemove(r) => {
                    let data = self.row(*r).ok_or_else(|| {
                        Error::InvalidState(format!(
                            "removed row {} missing during replay",
                            RowId::new(self.table_id, *r)
                        ))
                    })?;
                    merged.visible.remove(*r);
                    merged.indexes.remove_row(*r, &data, &merged.info);
                }
                TableEvent::ConstraintsAltered => {}
            }
        }
        Ok(merged)
    }
}

/// Read-only view over a begin-time snapshot of one table.
#[derive(Debug, Clone)]
pub struct SnapshotTable {
    source: Arc<TableSource>,
    state: CommittedState,
}

impl SnapshotTable {
    /// View over `state` of `source`.
    pub fn new(source: Arc<TableSource>, state: CommittedState) -> Self {
        SnapshotTable { source, state }
    }

    /// The underlying source.
    pub fn source(&self) -> &Arc<TableSource> {
        &self.source
    }

    /// The snapshot state.
    pub fn state(&self) -> &CommittedState {
        &self.state
    }
}

impl TableView for SnapshotTable {
    fn info(&self) -> &TableInfo {
        &self.state.info
    }

    fn contains_row(&self, row: u64) -> bool {
        self.state.visible.contains(row)
    }

    fn row(&self, row: u64) -> Option<Arc<Row>> {
        self.source.row(row)
    }

    fn row_count(&self) -> u64 {
        self.state.visible.len()
    }

    fn row_numbers(&self) -> Vec<u64> {
        self.state.visible.iter().collect()
    }

    fn index_lookup(&self, columns: &[usize], key: &IndexKey) -> Vec<u64> {
        match self.state.indexes.index_on(columns) {
            Some(ix) => ix
                .rows_for(key)
                .iter()
                .copied()
                .filter(|r| self.state.visible.contains(*r))
                .collect(),
            None => scan_lookup(self, columns, key),
        }
    }
}

/// Transaction-bound mutable view of one table.
///
/// Mutations update the local row bitmap and the copy-on-write index set
/// and journal into the registry; nothing touches the committed state
/// until the commit pipeline publishes the registry.
#[derive(Debug)]
pub struct MutableTable {
    source: Arc<TableSource>,
    info: Arc<TableInfo>,
    visible: RoaringTreemap,
    indexes: TransactionIndexSet,
    registry: EventRegistry,
}

impl MutableTable {
    /// The backing source.
    pub fn source(&self) -> &Arc<TableSource> {
        &self.source
    }

    /// Schema as this transaction sees it (reflects in-transaction
    /// ALTERs).
    pub fn table_info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    /// The journal accumulated so far.
    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// The transaction's index set for this table.
    pub fn index_set(&self) -> &TransactionIndexSet {
        &self.indexes
    }

    /// Mutable access to the index set (commit-time flush).
    pub fn index_set_mut(&mut self) -> &mut TransactionIndexSet {
        &mut self.indexes
    }

    /// The local visible bitmap.
    pub fn visible(&self) -> &RoaringTreemap {
        &self.visible
    }

    /// Fill omitted columns of a partial row: identity columns draw from
    /// the table's identity sequence, defaulted columns evaluate their
    /// default expression, everything else becomes `Null`.
    pub fn complete_row(&self, partial: Vec<Option<Value>>) -> Result<Row> {
        let columns = self.info.columns();
        if partial.len() != columns.len() {
            return Err(Error::InvalidState(format!(
                "row has {} values, table '{}' has {} columns",
                partial.len(),
                self.info.name(),
                columns.len()
            )));
        }
        let nulls: Row = vec![Value::Null; columns.len()];
        partial
            .into_iter()
            .zip(columns)
            .map(|(value, col)| match value {
                Some(v) => Ok(v),
                None if col.identity => Ok(Value::Integer(self.source.next_identity_value())),
                None => match &col.default {
                    Some(expr) => expr.eval(&nulls, &self.info),
                    None => Ok(Value::Null),
                },
            })
            .collect()
    }

    fn check_types(&self, row: &Row) -> Result<()> {
        let columns = self.info.columns();
        if row.len() != columns.len() {
            return Err(Error::InvalidState(format!(
                "row has {} values, table '{}' has {} columns",
                row.len(),
                self.info.name(),
                columns.len()
            )));
        }
        for (value, col) in row.iter().zip(columns) {
            if !col.sql_type.accepts(value) {
                return Err(Error::InvalidState(format!(
                    "column '{}' of table '{}' cannot store a {} value",
                    col.name,
                    self.info.name(),
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Add a row; returns its row number.
    pub fn add_row(&mut self, row: Row) -> Result<u64> {
        self.check_types(&row)?;
        let data = Arc::new(row);
        let row_number = self.source.allocate_row(data.clone());
        self.visible.insert(row_number);
        self.indexes.insert_row(row_number, &data, &self.info);
        self.registry.add_row(row_number);
        Ok(row_number)
    }

    /// Remove a visible row.
    pub fn remove_row(&mut self, row_number: u64) -> Result<()> {
        if !self.visible.contains(row_number) {
            return Err(Error::NotFound(
                RowId::new(self.source.table_id, row_number).to_string(),
            ));
        }
        let data = self.source.row(row_number).ok_or_else(|| {
            Error::Corruption(format!(
                "visible row {} has no data",
                RowId::new(self.source.table_id, row_number)
            ))
        })?;
        self.visible.remove(row_number);
        self.indexes.remove_row(row_number, &data, &self.info);
        self.registry.remove_row(row_number);
        Ok(())
    }

    /// Replace a visible row; returns the new row number. Journaled as
    /// the update pair so foreign-key checks can correlate old and new.
    pub fn update_row(&mut self, old_row: u64, row: Row) -> Result<u64> {
        if !self.visible.contains(old_row) {
            return Err(Error::NotFound(
                RowId::new(self.source.table_id, old_row).to_string(),
            ));
        }
        self.check_types(&row)?;
        let old_data = self.source.row(old_row).ok_or_else(|| {
            Error::Corruption(format!(
                "visible row {} has no data",
                RowId::new(self.source.table_id, old_row)
            ))
        })?;
        let data = Arc::new(row);
        let new_row = self.source.allocate_row(data.clone());
        self.visible.remove(old_row);
        self.indexes.remove_row(old_row, &old_data, &self.info);
        self.visible.insert(new_row);
        self.indexes.insert_row(new_row, &data, &self.info);
        self.registry.update_row(old_row, new_row);
        Ok(new_row)
    }

    /// Consume the view, keeping only its journal (used when a mutated
    /// table is dropped within the same transaction).
    pub fn into_registry(self) -> EventRegistry {
        self.registry
    }

    /// Install a new schema version (ALTER): journals the alteration and
    /// rebuilds the index set for the new constraint shape.
    pub fn set_info(&mut self, new_info: Arc<TableInfo>) {
        self.info = new_info;
        self.registry.constraints_altered();
        let rows: Vec<(u64, Arc<Row>)> = self
            .visible
            .iter()
            .filter_map(|r| self.source.row(r).map(|data| (r, data)))
            .collect();
        self.indexes
            .rebuild(&self.info, rows.iter().map(|(r, data)| (*r, &**data)));
    }
}

impl TableView for MutableTable {
    fn info(&self) -> &TableInfo {
        &self.info
    }

    fn contains_row(&self, row: u64) -> bool {
        self.visible.contains(row)
    }

    fn row(&self, row: u64) -> Option<Arc<Row>> {
        self.source.row(row)
    }

    fn row_count(&self) -> u64 {
        self.visible.len()
    }

    fn row_numbers(&self) -> Vec<u64> {
        self.visible.iter().collect()
    }

    fn index_lookup(&self, columns: &[usize], key: &IndexKey) -> Vec<u64> {
        match self.indexes.snapshot().index_on(columns) {
            Some(ix) => ix
                .rows_for(key)
                .iter()
                .copied()
                .filter(|r| self.visible.contains(*r))
                .collect(),
            None => scan_lookup(self, columns, key),
        }
    }
}

impl<T: TableView + ?Sized> TableView for &T {
    fn info(&self) -> &TableInfo {
        (**self).info()
    }
    fn contains_row(&self, row: u64) -> bool {
        (**self).contains_row(row)
    }
    fn row(&self, row: u64) -> Option<Arc<Row>> {
        (**self).row(row)
    }
    fn row_count(&self) -> u64 {
        (**self).row_count()
    }
    fn row_numbers(&self) -> Vec<u64> {
        (**self).row_numbers()
    }
    fn index_lookup(&self, columns: &[usize], key: &IndexKey) -> Vec<u64> {
        (**self).index_lookup(columns, key)
    }
}

/// The database-owned registry of table sources.
///
/// Transactions hold `Arc` clones of the sources they touch (pinning);
/// a dropped source stays in the retired set until the last pin goes
/// away, at which point its area can be reclaimed.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    visible: DashMap<u64, Arc<TableSource>>,
    names: DashMap<ObjectName, u64>,
    retired: DashMap<u64, Arc<TableSource>>,
}

impl SourceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        SourceRegistry::default()
    }

    /// Make a source visible under its published name.
    pub fn publish(&self, source: Arc<TableSource>) {
        self.names.insert(source.name(), source.table_id().0);
        self.visible.insert(source.table_id().0, source);
    }

    /// Source by table id.
    pub fn get(&self, table_id: TableId) -> Option<Arc<TableSource>> {
        self.visible.get(&table_id.0).map(|s| s.clone())
    }

    /// Source by published name.
    pub fn get_by_name(&self, name: &ObjectName) -> Option<Arc<TableSource>> {
        let id = *self.names.get(name)?;
        self.visible.get(&id).map(|s| s.clone())
    }

    /// All visible sources.
    pub fn visible_sources(&self) -> Vec<Arc<TableSource>> {
        self.visible.iter().map(|e| e.clone()).collect()
    }

    /// Move a source from visible to retired (DROP published).
    pub fn retire(&self, name: &ObjectName) -> Option<Arc<TableSource>> {
        let (_, id) = self.names.remove(name)?;
        let (_, source) = self.visible.remove(&id)?;
        self.retired.insert(id, source.clone());
        Some(source)
    }

    /// Retired sources no open transaction pins any more. They leave the
    /// retired set; the caller reclaims their areas and state entries.
    pub fn take_reclaimable(&self) -> Vec<Arc<TableSource>> {
        let ids: Vec<u64> = self
            .retired
            .iter()
            .filter(|e| Arc::strong_count(e.value()) == 1)
            .map(|e| *e.key())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.retired.remove(&id).map(|(_, s)| s))
            .collect()
    }
}

/// Persistent map from table id to the area holding its source record.
///
/// The table state store's lists carry `(table-id, name)`; this directory
/// pins down where each id's record lives in the paged store.
pub struct SourceDirectory {
    area: Area,
    map: Mutex<FxHashMap<u64, u64>>,
}

impl SourceDirectory {
    /// Allocate an empty directory.
    pub fn create(store: &dyn AreaStore) -> Result<SourceDirectory> {
        let area = store.create_area(0)?;
        let dir = SourceDirectory {
            area,
            map: Mutex::new(FxHashMap::default()),
        };
        dir.persist()?;
        Ok(dir)
    }

    /// Load a directory from its area.
    pub fn open(store: &dyn AreaStore, area_id: AreaId) -> Result<SourceDirectory> {
        let area = store.get_area(area_id, true)?;
        let entries: Vec<(u64, u64)> = bincode::deserialize(&area.read_all())?;
        Ok(SourceDirectory {
            area,
            map: Mutex::new(entries.into_iter().collect()),
        })
    }

    /// The directory's own area id (stored in the database root).
    pub fn area_id(&self) -> AreaId {
        self.area.id()
    }

    /// Area for a table id.
    pub fn get(&self, table_id: TableId) -> Option<AreaId> {
        self.map.lock().get(&table_id.0).map(|a| AreaId(*a))
    }

    /// Record where a table's source record lives.
    pub fn set(&self, table_id: TableId, area: AreaId) {
        self.map.lock().insert(table_id.0, area.0);
    }

    /// Forget a reclaimed table.
    pub fn remove(&self, table_id: TableId) {
        self.map.lock().remove(&table_id.0);
    }

    /// Serialize into the backing area.
    pub fn persist(&self) -> Result<()> {
        let mut entries: Vec<(u64, u64)> = self.map.lock().iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_unstable();
        self.area.replace(&bincode::serialize(&entries)?)
    }
}
