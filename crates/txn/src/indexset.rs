//! Copy-on-write index sets
//!
//! Every table carries one index per PRIMARY KEY and UNIQUE constraint
//! plus one per FOREIGN KEY's referencing columns. A committed
//! [`IndexSetSnapshot`] is immutable and shared by `Arc`; a transaction
//! wraps it in a [`TransactionIndexSet`], which clones the snapshot on
//! the first mutation so concurrent transactions never observe each
//! other's index changes. Before commit merging the transaction's set is
//! flushed back into a sealed snapshot.
//!
//! Indexes here are lookup structures, not enforcers: the constraint
//! checker consults them to find duplicate keys and foreign-key matches.

use lattice_core::{Collation, ConstraintKind, Row, TableInfo, Value};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Definition of one index: which columns, and whether keys must be
/// unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name (derived from the owning constraint)
    pub name: String,
    /// Column positions in schema order
    pub columns: Vec<usize>,
    /// Whether the owning constraint demands unique keys
    pub unique: bool,
}

/// Composite index key ordered by the canonical value ordering.
#[derive(Debug, Clone)]
pub struct IndexKey(pub SmallVec<[Value; 2]>);

impl IndexKey {
    /// Build a key from a row, folding each component through its
    /// column's collation.
    pub fn from_row(row: &Row, columns: &[usize], info: &TableInfo) -> IndexKey {
        IndexKey(
            columns
                .iter()
                .map(|&c| {
                    let collation: Option<&Collation> =
                        info.columns().get(c).and_then(|col| col.sql_type.collation());
                    row.get(c).cloned().unwrap_or(Value::Null).collation_key(collation)
                })
                .collect(),
        )
    }

    /// Whether any component is `Null` (null keys are exempt from
    /// uniqueness).
    pub fn has_null(&self) -> bool {
        self.0.iter().any(|v| v.is_null())
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut it_a = self.0.iter();
        let mut it_b = other.0.iter();
        loop {
            match (it_a.next(), it_b.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => match a.index_cmp(b) {
                    Ordering::Equal => continue,
                    other => return other,
                },
            }
        }
    }
}

/// One index: a sorted map from composite key to row numbers.
#[derive(Debug, Clone)]
pub struct RowIndex {
    def: IndexDef,
    map: BTreeMap<IndexKey, SmallVec<[u64; 2]>>,
}

impl RowIndex {
    /// Empty index for `def`.
    pub fn new(def: IndexDef) -> Self {
        RowIndex {
            def,
            map: BTreeMap::new(),
        }
    }

    /// The index definition.
    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    /// Insert a row under a key.
    pub fn insert(&mut self, key: IndexKey, row: u64) {
        let rows = self.map.entry(key).or_default();
        if !rows.contains(&row) {
            rows.push(row);
        }
    }

    /// Remove a row from a key, dropping the entry when it empties.
    pub fn remove(&mut self, key: &IndexKey, row: u64) {
        if let Some(rows) = self.map.get_mut(key) {
            rows.retain(|r| *r != row);
            if rows.is_empty() {
                self.map.remove(key);
            }
        }
    }

    /// Row numbers stored under `key`.
    pub fn rows_for(&self, key: &IndexKey) -> &[u64] {
        self.map.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.map.len()
    }
}

/// Immutable snapshot of all indexes of one table.
#[derive(Debug, Clone, Default)]
pub struct IndexSetSnapshot {
    indexes: Vec<RowIndex>,
}

impl IndexSetSnapshot {
    /// Snapshot from prepared indexes.
    pub fn new(indexes: Vec<RowIndex>) -> Self {
        IndexSetSnapshot { indexes }
    }

    /// Empty snapshot with the index skeleton `info` demands.
    pub fn for_info(info: &TableInfo) -> Self {
        IndexSetSnapshot {
            indexes: index_defs_for(info).into_iter().map(RowIndex::new).collect(),
        }
    }

    /// All indexes.
    pub fn indexes(&self) -> &[RowIndex] {
        &self.indexes
    }

    /// The index whose columns are exactly `columns`, if any.
    pub fn index_on(&self, columns: &[usize]) -> Option<&RowIndex> {
        self.indexes.iter().find(|ix| ix.def.columns == columns)
    }
}

/// The index defs a schema demands: one per PK/UNIQUE (unique) and one
/// per FK's referencing columns (non-unique).
pub fn index_defs_for(info: &TableInfo) -> Vec<IndexDef> {
    let mut defs = Vec::new();
    for c in info.constraints() {
        let (columns, unique) = match &c.kind {
            ConstraintKind::PrimaryKey { columns } | ConstraintKind::Unique { columns } => {
                (columns, true)
            }
            ConstraintKind::ForeignKey { columns, .. } => (columns, false),
            ConstraintKind::Check { .. } => continue,
        };
        let positions: Vec<usize> = columns
            .iter()
            .filter_map(|name| info.column_index(name))
            .collect();
        if positions.len() != columns.len() {
            continue; // TableInfo::new already rejects unknown columns
        }
        // Two constraints over identical columns share one index.
        if defs.iter().any(|d: &IndexDef| d.columns == positions) {
            if unique {
                if let Some(d) = defs.iter_mut().find(|d| d.columns == positions) {
                    d.unique = true;
                }
            }
            continue;
        }
        defs.push(IndexDef {
            name: c.name.clone(),
            columns: positions,
            unique,
        });
    }
    defs
}

/// Copy-on-write per-transaction view over a committed index snapshot.
///
/// The set starts as a cheap reference to the snapshot the transaction
/// received at begin. The first mutation clones the snapshot into a
/// private copy; [`flush`](TransactionIndexSet::flush) seals the copy
/// back into a sharable snapshot for commit merging.
#[derive(Debug, Clone)]
pub struct TransactionIndexSet {
    base: Arc<IndexSetSnapshot>,
    private: Option<IndexSetSnapshot>,
}

impl TransactionIndexSet {
    /// Wrap the snapshot received at transaction begin.
    pub fn new(base: Arc<IndexSetSnapshot>) -> Self {
        TransactionIndexSet {
            base,
            private: None,
        }
    }

    /// Whether the transaction has diverged from the begin snapshot.
    pub fn is_private(&self) -> bool {
        self.private.is_some()
    }

    /// Read view: the private copy if one exists, the begin snapshot
    /// otherwise.
    pub fn snapshot(&self) -> &IndexSetSnapshot {
        match &self.private {
            Some(private) => private,
            None => &*self.base,
        }
    }

    fn make_private(&mut self) -> &mut IndexSetSnapshot {
        if self.private.is_none() {
            self.private = Some((*self.base).clone());
        }
        self.private.as_mut().expect("just materialized")
    }

    /// Index a row under every index of the set.
    pub fn insert_row(&mut self, row_number: u64, row: &Row, info: &TableInfo) {
        if self.base.indexes().is_empty() && self.private.is_none() {
            return;
        }
        let target = self.make_private();
        for ix in &mut target.indexes {
            let key = IndexKey::from_row(row, &ix.def.columns, info);
            ix.insert(key, row_number);
        }
    }

    /// Unindex a row from every index of the set.
    pub fn remove_row(&mut self, row_number: u64, row: &Row, info: &TableInfo) {
        if self.base.indexes().is_empty() && self.private.is_none() {
            return;
        }
        let target = self.make_private();
        for ix in &mut target.indexes {
            let key = IndexKey::from_row(row, &ix.def.columns, info);
            ix.remove(&key, row_number);
        }
    }

    /// Rebuild the set from scratch for a new schema version, indexing
    /// every `(row_number, row)` the caller streams in.
    pub fn rebuild<'a>(
        &mut self,
        info: &TableInfo,
        rows: impl Iterator<Item = (u64, &'a Row)>,
    ) {
        let mut fresh = IndexSetSnapshot::for_info(info);
        for (row_number, row) in rows {
            for ix in &mut fresh.indexes {
                let key = IndexKey::from_row(row, &ix.def.columns, info);
                ix.insert(key, row_number);
            }
        }
        self.private = Some(fresh);
    }

    /// Seal the pending state into a sharable snapshot. The set resets to
    /// reference the sealed snapshot, so repeated flushes are idempotent.
    pub fn flush(&mut self) -> Arc<IndexSetSnapshot> {
        if let Some(private) = self.private.take() {
            self.base = Arc::new(private);
        }
        self.base.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{ColumnInfo, ConstraintInfo, ObjectName, SqlType};

    fn parent_info() -> TableInfo {
        TableInfo::new(
            ObjectName::new("app", "parent"),
            vec![
                ColumnInfo::new("id", SqlType::Integer).not_null(),
                ColumnInfo::new("name", SqlType::varchar()),
            ],
            vec![ConstraintInfo::new(
                "pk_parent",
                ConstraintKind::PrimaryKey {
                    columns: vec!["id".into()],
                },
            )],
        )
        .unwrap()
    }

    fn key(vals: &[Value]) -> IndexKey {
        IndexKey(vals.iter().cloned().collect())
    }

    #[test]
    fn defs_derive_from_constraints() {
        let defs = index_defs_for(&parent_info());
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].columns, vec![0]);
        assert!(defs[0].unique);
        assert_eq!(defs[0].name, "pk_parent");
    }

    #[test]
    fn insert_lookup_remove() {
        let mut ix = RowIndex::new(IndexDef {
            name: "u_x".into(),
            columns: vec![0],
            unique: true,
        });
        ix.insert(key(&[Value::Integer(5)]), 0);
        ix.insert(key(&[Value::Integer(5)]), 1);
        assert_eq!(ix.rows_for(&key(&[Value::Integer(5)])), &[0, 1]);
        ix.remove(&key(&[Value::Integer(5)]), 0);
        assert_eq!(ix.rows_for(&key(&[Value::Integer(5)])), &[1]);
        ix.remove(&key(&[Value::Integer(5)]), 1);
        assert_eq!(ix.key_count(), 0);
    }

    #[test]
    fn cow_leaves_base_untouched() {
        let info = parent_info();
        let base = Arc::new(IndexSetSnapshot::for_info(&info));

        let mut tx_a = TransactionIndexSet::new(base.clone());
        let mut tx_b = TransactionIndexSet::new(base.clone());
        assert!(!tx_a.is_private());

        let row = vec![Value::Integer(1), Value::String("a".into())];
        tx_a.insert_row(0, &row, &info);
        assert!(tx_a.is_private());

        // B and the base still see an empty index.
        let k = key(&[Value::Integer(1)]);
        assert_eq!(tx_a.snapshot().index_on(&[0]).unwrap().rows_for(&k), &[0]);
        assert!(tx_b.snapshot().index_on(&[0]).unwrap().rows_for(&k).is_empty());
        assert!(base.index_on(&[0]).unwrap().rows_for(&k).is_empty());
        assert!(!tx_b.is_private());
    }

    #[test]
    fn flush_seals_and_resets() {
        let info = parent_info();
        let mut set = TransactionIndexSet::new(Arc::new(IndexSetSnapshot::for_info(&info)));
        let row = vec![Value::Integer(7), Value::Null];
        set.insert_row(3, &row, &info);

        let sealed = set.flush();
        assert!(!set.is_private());
        let k = key(&[Value::Integer(7)]);
        assert_eq!(sealed.index_on(&[0]).unwrap().rows_for(&k), &[3]);
        // Idempotent: a second flush returns the same snapshot.
        let again = set.flush();
        assert!(Arc::ptr_eq(&sealed, &again));
    }

    #[test]
    fn collation_folds_index_keys() {
        use lattice_core::Collation;
        let info = TableInfo::new(
            ObjectName::new("app", "t"),
            vec![ColumnInfo::new(
                "code",
                SqlType::VarChar {
                    size: None,
                    collation: Some(Collation::case_insensitive()),
                },
            )],
            vec![ConstraintInfo::new(
                "u_code",
                ConstraintKind::Unique {
                    columns: vec!["code".into()],
                },
            )],
        )
        .unwrap();

        let a = IndexKey::from_row(&vec![Value::String("ABC".into())], &[0], &info);
        let b = IndexKey::from_row(&vec![Value::String("abc".into())], &[0], &info);
        assert_eq!(a, b);
    }

    #[test]
    fn null_keys_are_flagged() {
        let k = key(&[Value::Integer(1), Value::Null]);
        assert!(k.has_null());
        let k = key(&[Value::Integer(1)]);
        assert!(!k.has_null());
    }
}
