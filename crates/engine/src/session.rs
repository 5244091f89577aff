//! Sessions
//!
//! A [`Session`] binds transactions to a user. Statements take their
//! table locks for the duration of the statement; handles acquired
//! through [`Session::lock`] are owned by the session and released at
//! transaction end even on error paths. The session runs the immediate
//! constraint pass after each mutating statement and wraps DDL into the
//! transaction's created/dropped sets after consulting the privilege
//! callback.
//!
//! A statement that fails its immediate constraint check leaves the
//! transaction with the offending change still journaled; the caller is
//! expected to roll back, as the commit pipeline would re-detect the
//! violation anyway.

use crate::catalog::{CatalogChange, CatalogObject, SequenceDef, TriggerDef, ViewDef};
use crate::database::Database;
use lattice_core::{
    ConstraintInfo, Deferrability, Error, ObjectName, ObjectType, PlanContext, Privilege,
    QueryPlanNode, Result, Row, RowId, RowSet, TableId, TableInfo, Value,
};
use lattice_txn::{constraints, IsolationLevel, LockHandle, Transaction};
use std::sync::Arc;
use tracing::debug;

/// A user's session against one database.
pub struct Session {
    db: Arc<Database>,
    user: String,
    tx: Option<Transaction>,
    locks: Vec<LockHandle>,
    catalog_changes: Vec<CatalogChange>,
}

impl Session {
    pub(crate) fn new(db: Arc<Database>, user: String) -> Session {
        Session {
            db,
            user,
            tx: None,
            locks: Vec::new(),
            catalog_changes: Vec::new(),
        }
    }

    /// The bound user.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Whether a transaction is active.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// The active transaction, if any.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.tx.as_ref()
    }

    /// Mutable access to the active transaction, for callers driving the
    /// core surfaces directly.
    pub fn transaction_mut(&mut self) -> Result<&mut Transaction> {
        self.tx
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no active transaction".into()))
    }

    /// Begin a serializable transaction.
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.begin_with(IsolationLevel::Serializable)
    }

    /// Begin a transaction at an explicit isolation level (only
    /// serializable exists).
    pub fn begin_with(&mut self, _isolation: IsolationLevel) -> Result<()> {
        if self.tx.is_some() {
            return Err(Error::InvalidState(
                "a transaction is already active".into(),
            ));
        }
        self.tx = Some(self.db.begin_transaction()?);
        Ok(())
    }

    /// Commit the active transaction. Locks are released whatever the
    /// outcome; on success the commit-id is returned, pending catalog
    /// changes are applied, and post-commit events are delivered.
    pub fn commit(&mut self) -> Result<u64> {
        let mut tx = self
            .tx
            .take()
            .ok_or_else(|| Error::InvalidState("no active transaction".into()))?;
        let result = self.db.commit_transaction(&mut tx);
        self.release_locks();
        let changes = std::mem::take(&mut self.catalog_changes);
        match result {
            Ok(commit_id) => {
                self.db.apply_catalog_changes(changes)?;
                Ok(commit_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Roll the active transaction back. Locks are released; nothing the
    /// transaction did survives.
    pub fn rollback(&mut self) -> Result<()> {
        let mut tx = self
            .tx
            .take()
            .ok_or_else(|| Error::InvalidState("no active transaction".into()))?;
        let result = self.db.rollback_transaction(&mut tx);
        self.release_locks();
        self.catalog_changes.clear();
        result
    }

    fn release_locks(&mut self) {
        for mut handle in self.locks.drain(..) {
            handle.release();
        }
    }

    fn active(&mut self) -> Result<&mut Transaction> {
        self.tx
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no active transaction".into()))
    }

    fn table_id_of(tx: &Transaction, name: &ObjectName) -> Result<TableId> {
        tx.snapshot(name)
            .map(|s| s.source.table_id())
            .ok_or_else(|| Error::NotFound(format!("table '{name}'")))
    }

    /// Statement-scope lock: the returned handle drops (and releases)
    /// when the statement finishes. Isolation across statements comes
    /// from commit-time validation, not from holding table locks.
    fn lock_table(&mut self, table_id: TableId, exclusive: bool) -> Result<LockHandle> {
        let owner = self.tx.as_ref().map(|t| t.id()).unwrap_or_default();
        let locks = self.db.locks().clone();
        if exclusive {
            locks.lock(owner, &[table_id], &[])
        } else {
            locks.lock(owner, &[], &[table_id])
        }
    }

    /// Acquire locks for a multi-table statement the caller drives
    /// through the core surfaces directly. The handle is retained by the
    /// session and released at transaction end as a backstop.
    pub fn lock(&mut self, write: &[TableId], read: &[TableId]) -> Result<()> {
        let owner = self.tx.as_ref().map(|t| t.id()).unwrap_or_default();
        let locks = self.db.locks().clone();
        let handle = locks.lock(owner, write, read)?;
        self.locks.push(handle);
        Ok(())
    }

    fn require_privilege(
        &self,
        object_type: ObjectType,
        name: &ObjectName,
        privilege: Privilege,
    ) -> Result<()> {
        if self
            .db
            .privileges()
            .user_has_privilege(&self.user, object_type, name, privilege)
        {
            Ok(())
        } else {
            Err(Error::PrivilegeDenied {
                user: self.user.clone(),
                privilege: privilege.to_string(),
                object: name.to_string(),
            })
        }
    }

    // === DML ===

    /// Insert a row. `None` values draw from the column's identity
    /// sequence or default expression. Immediate constraints are checked
    /// before the statement returns.
    pub fn insert(&mut self, table: &str, values: Vec<Option<Value>>) -> Result<RowId> {
        let name = self.db.object_name(table);
        let table_id = Self::table_id_of(self.active()?, &name)?;
        let _lock = self.lock_table(table_id, true)?;

        let tx = self.active()?;
        let row_number = {
            let mutable = tx.mutable_table(&name)?;
            let row = mutable.complete_row(values)?;
            mutable.add_row(row)?
        };
        constraints::check_add_violations(
            tx,
            &name,
            &[row_number],
            Deferrability::InitiallyImmediate,
        )?;
        debug!(table = %name, row = row_number, "row inserted");
        Ok(RowId::new(table_id, row_number))
    }

    /// Delete a visible row by number.
    pub fn delete(&mut self, table: &str, row: u64) -> Result<()> {
        let name = self.db.object_name(table);
        let table_id = Self::table_id_of(self.active()?, &name)?;
        let _lock = self.lock_table(table_id, true)?;

        let tx = self.active()?;
        tx.mutable_table(&name)?.remove_row(row)?;
        constraints::check_remove_violations(
            tx,
            &name,
            &[row],
            Deferrability::InitiallyImmediate,
        )?;
        Ok(())
    }

    /// Replace a visible row; returns the new row id.
    pub fn update(&mut self, table: &str, row: u64, new_row: Row) -> Result<RowId> {
        let name = self.db.object_name(table);
        let table_id = Self::table_id_of(self.active()?, &name)?;
        let _lock = self.lock_table(table_id, true)?;

        let tx = self.active()?;
        let new_number = tx.mutable_table(&name)?.update_row(row, new_row)?;
        constraints::check_add_violations(
            tx,
            &name,
            &[new_number],
            Deferrability::InitiallyImmediate,
        )?;
        constraints::check_remove_violations(
            tx,
            &name,
            &[row],
            Deferrability::InitiallyImmediate,
        )?;
        Ok(RowId::new(table_id, new_number))
    }

    /// All visible rows of a table, in row-number order. Records the
    /// select for dirty-select checking and takes a shared lock.
    pub fn scan(&mut self, table: &str) -> Result<Vec<(u64, Arc<Row>)>> {
        let name = self.db.object_name(table);
        let table_id = Self::table_id_of(self.active()?, &name)?;
        let _lock = self.lock_table(table_id, false)?;

        let tx = self.active()?;
        let view = tx.table(&name)?;
        Ok(view
            .row_numbers()
            .into_iter()
            .filter_map(|r| view.row(r).map(|data| (r, data)))
            .collect())
    }

    // === DDL ===

    /// Create a table.
    pub fn create_table(&mut self, info: TableInfo) -> Result<TableId> {
        self.require_privilege(ObjectType::Table, info.name(), Privilege::Create)?;
        let db = self.db.clone();
        let tx = self.active()?;
        db.create_table(tx, info)
    }

    /// Drop a table.
    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        let name = self.db.object_name(table);
        self.require_privilege(ObjectType::Table, &name, Privilege::Drop)?;
        let table_id = Self::table_id_of(self.active()?, &name)?;
        let _lock = self.lock_table(table_id, true)?;
        self.active()?.drop_table(&name)
    }

    /// Replace a table's constraint set. The whole table is re-validated
    /// at commit.
    pub fn alter_table_constraints(
        &mut self,
        table: &str,
        constraints: Vec<ConstraintInfo>,
    ) -> Result<()> {
        let name = self.db.object_name(table);
        self.require_privilege(ObjectType::Table, &name, Privilege::Alter)?;
        let table_id = Self::table_id_of(self.active()?, &name)?;
        let _lock = self.lock_table(table_id, true)?;

        let tx = self.active()?;
        let mutable = tx.mutable_table(&name)?;
        let altered = mutable.table_info().with_constraints(constraints)?;
        mutable.set_info(Arc::new(altered));
        tx.mark_constraints_altered(table_id);
        Ok(())
    }

    /// Create a view.
    pub fn create_view(&mut self, def: ViewDef) -> Result<()> {
        self.require_privilege(ObjectType::View, &def.name, Privilege::Create)?;
        self.create_catalog_object(CatalogObject::View(def))
    }

    /// Drop a view.
    pub fn drop_view(&mut self, view: &str) -> Result<()> {
        let name = self.db.object_name(view);
        self.require_privilege(ObjectType::View, &name, Privilege::Drop)?;
        self.drop_catalog_object(ObjectType::View, name)
    }

    /// Create a sequence starting at its configured start value.
    pub fn create_sequence(&mut self, def: SequenceDef) -> Result<()> {
        self.require_privilege(ObjectType::Sequence, &def.name, Privilege::Create)?;
        let current = def.start;
        self.create_catalog_object(CatalogObject::Sequence { def, current })
    }

    /// Drop a sequence.
    pub fn drop_sequence(&mut self, sequence: &str) -> Result<()> {
        let name = self.db.object_name(sequence);
        self.require_privilege(ObjectType::Sequence, &name, Privilege::Drop)?;
        self.drop_catalog_object(ObjectType::Sequence, name)
    }

    /// Create a trigger definition. Attach a body with
    /// [`EventDispatcher::register_trigger`].
    ///
    /// [`EventDispatcher::register_trigger`]: crate::events::EventDispatcher::register_trigger
    pub fn create_trigger(&mut self, def: TriggerDef) -> Result<()> {
        self.require_privilege(ObjectType::Trigger, &def.name, Privilege::Create)?;
        self.create_catalog_object(CatalogObject::Trigger(def))
    }

    /// Drop a trigger.
    pub fn drop_trigger(&mut self, trigger: &str) -> Result<()> {
        let name = self.db.object_name(trigger);
        self.require_privilege(ObjectType::Trigger, &name, Privilege::Drop)?;
        self.drop_catalog_object(ObjectType::Trigger, name)
    }

    /// Advance a sequence. Sequences are non-transactional: the value is
    /// consumed even if the surrounding transaction rolls back.
    pub fn next_sequence_value(&mut self, sequence: &str) -> Result<i64> {
        let name = self.db.object_name(sequence);
        self.db.catalog().sequence_next(&name)
    }

    /// Materialize a plan produced by the external planner (sub-queries
    /// during constraint evaluation, view bodies) in this session's
    /// context.
    pub fn evaluate(&self, plan: &dyn QueryPlanNode, params: Vec<Value>) -> Result<RowSet> {
        plan.evaluate(&PlanContext {
            user: self.user.clone(),
            params,
        })
    }

    fn create_catalog_object(&mut self, object: CatalogObject) -> Result<()> {
        let (ty, name) = (object.object_type(), object.name().clone());
        let already_pending = self.catalog_changes.iter().any(|c| match c {
            CatalogChange::Create(o) => o.object_type() == ty && o.name() == &name,
            CatalogChange::Drop(..) => false,
        });
        if already_pending || self.db.catalog().contains(ty, &name) {
            return Err(Error::InvalidState(format!("{ty} '{name}' already exists")));
        }
        self.active()?.add_created(ty, name)?;
        self.catalog_changes.push(CatalogChange::Create(object));
        Ok(())
    }

    fn drop_catalog_object(&mut self, ty: ObjectType, name: ObjectName) -> Result<()> {
        // Dropping an object created in this same transaction cancels
        // the pending creation.
        if let Some(pos) = self.catalog_changes.iter().position(|c| match c {
            CatalogChange::Create(o) => o.object_type() == ty && o.name() == &name,
            CatalogChange::Drop(..) => false,
        }) {
            self.catalog_changes.remove(pos);
            return self.active()?.add_dropped(ty, name);
        }
        if !self.db.catalog().contains(ty, &name) {
            return Err(Error::NotFound(format!("{ty} '{name}'")));
        }
        self.active()?.add_dropped(ty, name.clone())?;
        self.catalog_changes.push(CatalogChange::Drop(ty, name));
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.tx.is_some() {
            let _ = self.rollback();
        } else {
            self.release_locks();
        }
    }
}
