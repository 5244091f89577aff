//! The commit pipeline
//!
//! [`CommitManager`] owns the system-wide commit mutex, the global
//! commit-id counter, and the log of object-commit-states (which past
//! commit created/dropped which names). Commit is the only phase that
//! advances the commit-id, and exactly one commit runs at a time.
//!
//! # Stages
//!
//! Under the commit mutex:
//!
//! 1. **Dirty-select check** (config-gated): any registry committed to a
//!    read table after this transaction began rejects the commit.
//! 2. **Namespace conflict check**: a concurrent commit created the same
//!    name this transaction creates (or dropped the same name it drops).
//! 3. **Row conflict check**: a touched table was concurrently dropped,
//!    or a concurrent registry clashes with this transaction's journal.
//! 4. **Dropped-table conflict**: a table this transaction drops was
//!    concurrently modified.
//! 5. **Check-view construction**: a read-only transaction synthesized at
//!    the current head showing the post-commit state. A touched table
//!    with no concurrent commits reuses this transaction's index set
//!    directly; otherwise the journal is replayed against the current
//!    committed state and a fresh index snapshot is flushed.
//! 6. **Deferred constraint check** against the check-view: full-table
//!    validation where constraints were altered, add/remove checks on the
//!    normalized row sets everywhere else.
//! 7. **Event staging**: one table-change event per changed table plus
//!    schema events, delivered only if publish succeeds.
//! 8. **Publish**: registries sealed and attached, index snapshots
//!    adopted, row bitmaps updated, sources persisted, the table state
//!    store's visible/delete lists rewritten and flushed, the
//!    object-commit-state appended, the commit-id advanced.
//! 9. **Cleanup** (always runs): on failure every staged row is
//!    discarded; the transaction leaves `Committing` into its terminal
//!    state. Lock release is the owning session's duty.
//!
//! A transaction that began at commit-id `c` saw every commit `≤ c`;
//! its conflict window is therefore the registries and object states
//! with commit-id `> c`.

use crate::constraints;
use crate::events::{CommitEvent, SchemaAction, SchemaChangeEvent, TableChangeEvent};
use crate::source::{CommittedState, SourceDirectory, SourceRegistry, TableSource};
use crate::transaction::{TableSnapshot, Transaction};
use lattice_core::{Deferrability, Error, ObjectName, ObjectType, Result, TableId};
use lattice_store::{AreaStore, TableSourceState, TableStateStore};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Reserved transaction id for synthesized check-views.
const CHECK_TX_ID: u64 = u64::MAX;

/// Names created and dropped by one past commit.
#[derive(Debug, Clone)]
pub struct ObjectCommitState {
    /// The commit that published these changes
    pub commit_id: u64,
    /// Objects the commit created
    pub created: Vec<(ObjectType, ObjectName)>,
    /// Objects the commit dropped
    pub dropped: Vec<(ObjectType, ObjectName)>,
}

/// Engine collaborators the pipeline publishes through.
pub struct CommitContext<'a> {
    /// The paged store everything persists into
    pub store: &'a Arc<dyn AreaStore>,
    /// Registry of visible table sources
    pub sources: &'a SourceRegistry,
    /// Persistent visible/delete lists + table-id counter
    pub state_store: &'a TableStateStore,
    /// Persistent table-id → area map
    pub source_dir: &'a SourceDirectory,
    /// Reject commits whose read tables were concurrently modified
    pub error_on_dirty_select: bool,
}

/// What a successful commit produced.
#[derive(Debug)]
pub struct CommitOutcome {
    /// The commit-id assigned (unchanged head for a read-only commit)
    pub commit_id: u64,
    /// Events to deliver, in registry order per table
    pub events: Vec<CommitEvent>,
}

/// Owner of the commit mutex, the commit-id counter, and the
/// object-commit-state log.
pub struct CommitManager {
    commit_mutex: Mutex<()>,
    commit_id: AtomicU64,
    next_tx_id: AtomicU64,
    object_states: RwLock<Vec<ObjectCommitState>>,
}

impl CommitManager {
    /// Manager resuming at `initial_commit_id` (0 for a fresh database).
    pub fn new(initial_commit_id: u64) -> Self {
        CommitManager {
            commit_mutex: Mutex::new(()),
            commit_id: AtomicU64::new(initial_commit_id),
            next_tx_id: AtomicU64::new(1),
            object_states: RwLock::new(Vec::new()),
        }
    }

    /// The latest published commit-id.
    pub fn current_commit_id(&self) -> u64 {
        self.commit_id.load(Ordering::SeqCst)
    }

    /// Open a transaction over a consistent begin-time snapshot. The
    /// commit mutex is held while capturing, so the snapshot observes a
    /// single commit-id.
    pub fn begin_transaction(&self, sources: &SourceRegistry) -> Transaction {
        let _guard = self.commit_mutex.lock();
        let id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        let begin = self.commit_id.load(Ordering::SeqCst);
        Transaction::new(
            id,
            begin,
            sources
                .visible_sources()
                .into_iter()
                .map(|s| (s.name(), TableSnapshot::capture(&s))),
        )
    }

    /// Run the commit pipeline. On success the transaction is
    /// `Committed` and the outcome carries the events to deliver; on
    /// failure every staged change is discarded and the transaction is
    /// `Aborted`.
    pub fn commit(&self, tx: &mut Transaction, ctx: &CommitContext<'_>) -> Result<CommitOutcome> {
        let _guard = self.commit_mutex.lock();
        tx.begin_commit()?;
        match self.run_pipeline(tx, ctx) {
            Ok(outcome) => {
                self.discard_cancelled(tx, ctx);
                tx.complete_commit();
                info!(
                    tx = tx.id(),
                    commit_id = outcome.commit_id,
                    "transaction committed"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.discard_staged(tx, ctx);
                tx.fail_commit();
                debug!(tx = tx.id(), error = %e, "commit rejected");
                Err(e)
            }
        }
    }

    /// Roll a transaction back: every staged row and created source is
    /// discarded; the visible state is untouched.
    pub fn rollback(&self, tx: &mut Transaction, ctx: &CommitContext<'_>) -> Result<()> {
        tx.begin_rollback()?;
        self.discard_staged(tx, ctx);
        tx.complete_rollback();
        debug!(tx = tx.id(), "transaction rolled back");
        Ok(())
    }

    /// Drop object states and per-source history no open transaction can
    /// observe (every open transaction began at `min_open_begin` or
    /// later).
    pub fn truncate_history(&self, min_open_begin: u64, sources: &SourceRegistry) {
        self.object_states
            .write()
            .retain(|s| s.commit_id > min_open_begin);
        for source in sources.visible_sources() {
            source.truncate_history(min_open_begin);
        }
    }

    /// The object-commit-state log (diagnostics and tests).
    pub fn object_states(&self) -> Vec<ObjectCommitState> {
        self.object_states.read().clone()
    }

    fn discard_cancelled(&self, tx: &Transaction, ctx: &CommitContext<'_>) {
        // Tables created and dropped within the committed transaction
        // leave no published trace; their journals and areas go now.
        for (source, registry) in tx.discarded_registries() {
            source.rollback_transaction_change(registry);
        }
        for source in tx.cancelled_sources() {
            let _ = ctx.store.delete_area(source.area_id());
        }
    }

    fn discard_staged(&self, tx: &mut Transaction, ctx: &CommitContext<'_>) {
        for mutable in tx.touched_tables().values() {
            mutable
                .source()
                .rollback_transaction_change(mutable.registry());
        }
        self.discard_cancelled(tx, ctx);
        for source in tx.created_sources() {
            let _ = ctx.store.delete_area(source.area_id());
        }
    }

    fn run_pipeline(&self, tx: &mut Transaction, ctx: &CommitContext<'_>) -> Result<CommitOutcome> {
        let since = tx.begin_commit_id() + 1;

        // (i) Dirty-select check.
        if ctx.error_on_dirty_select {
            for &table_id in tx.read_tables() {
                match ctx.sources.get(TableId(table_id)) {
                    Some(source) => {
                        if !source.find_changes_since(since).is_empty() {
                            return Err(Error::DirtySelect {
                                table: source.name().to_string(),
                            });
                        }
                    }
                    // A read table no longer visible was concurrently
                    // dropped and committed.
                    None => {
                        let table = tx
                            .table_names()
                            .into_iter()
                            .find(|n| {
                                tx.snapshot(n)
                                    .map(|s| s.source.table_id().0 == table_id)
                                    .unwrap_or(false)
                            })
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| format!("#{table_id}"));
                        return Err(Error::DirtySelect { table });
                    }
                }
            }
        }

        // (ii) Namespace conflict check.
        {
            let states = self.object_states.read();
            for state in states.iter().filter(|s| s.commit_id >= since) {
                for (ty, name) in tx.created_objects() {
                    if state.created.iter().any(|(t, n)| t == ty && n == name) {
                        return Err(Error::ObjectDuplicated {
                            name: name.to_string(),
                            action: "created",
                        });
                    }
                }
                for (ty, name) in tx.dropped_objects() {
                    if state.dropped.iter().any(|(t, n)| t == ty && n == name) {
                        return Err(Error::ObjectDuplicated {
                            name: name.to_string(),
                            action: "dropped",
                        });
                    }
                }
            }
        }

        // (iii) Row conflict check.
        let dropped_since: FxHashSet<ObjectName> = {
            let states = self.object_states.read();
            states
                .iter()
                .filter(|s| s.commit_id >= since)
                .flat_map(|s| {
                    s.dropped
                        .iter()
                        .filter(|(ty, _)| *ty == ObjectType::Table)
                        .map(|(_, n)| n.clone())
                })
                .collect()
        };
        for mutable in tx.touched_tables().values() {
            let name = mutable.table_info().name().clone();
            if dropped_since.contains(&name) {
                return Err(Error::NonCommittedConflict {
                    table: name.to_string(),
                });
            }
            for past in mutable.source().find_changes_since(since) {
                if let Some(row) = mutable.registry().test_commit_clash(&past) {
                    return Err(Error::RowRemoveConflict {
                        table: name.to_string(),
                        row,
                    });
                }
            }
        }

        // (iv) Dropped-table conflict.
        for source in tx.dropped_table_sources().values() {
            if !source.find_changes_since(since).is_empty() {
                return Err(Error::DroppedModified {
                    table: source.name().to_string(),
                });
            }
        }

        // (v) Build the synthetic check-view at the current head.
        let head = self.commit_id.load(Ordering::SeqCst);
        let mut check = Transaction::new(
            CHECK_TX_ID,
            head,
            ctx.sources
                .visible_sources()
                .into_iter()
                .map(|s| (s.name(), TableSnapshot::capture(&s))),
        );
        for (ty, name) in tx.dropped_objects() {
            if *ty == ObjectType::Table {
                check.remove_visible_table(name)?;
            }
        }
        for source in tx.created_sources() {
            check.attach_table(TableSnapshot::capture(source));
        }

        let mut merged: BTreeMap<u64, MergedTable> = BTreeMap::new();
        for (&table_id, mutable) in tx.touched_tables_mut().iter_mut() {
            let source = mutable.source().clone();
            let altered = mutable.registry().has_constraints_altered();
            let concurrent = !source.find_changes_since(since).is_empty();

            let (visible, indexes, state_info) = if !concurrent {
                (
                    mutable.visible().clone(),
                    mutable.index_set_mut().flush(),
                    mutable.table_info().clone(),
                )
            } else {
                // Concurrent commits landed on this table: replay this
                // transaction's journal against the current committed
                // state to produce the true post-commit view.
                let mut replay =
                    source.replay_mutable(&source.committed(), mutable.registry().events())?;
                if altered {
                    replay.set_info(mutable.table_info().clone());
                }
                let indexes = replay.index_set_mut().flush();
                (
                    replay.visible().clone(),
                    indexes,
                    replay.table_info().clone(),
                )
            };

            merged.insert(
                table_id,
                MergedTable {
                    indexes: indexes.clone(),
                    new_info: altered.then(|| state_info.clone()),
                },
            );
            check.update_visible_table(TableSnapshot {
                source,
                committed: CommittedState {
                    info: state_info,
                    visible: Arc::new(visible),
                    indexes,
                },
            });
        }
        check.set_read_only();

        // (vi) Deferred constraint check against the check-view.
        for &table_id in tx.constraint_altered_tables() {
            if let Some(mutable) = tx.touched_tables().get(&table_id) {
                let name = mutable.table_info().name().clone();
                if check.table_exists(&name) {
                    constraints::check_full_table(&check, &name)?;
                }
            }
        }
        for mutable in tx.touched_tables().values() {
            let name = mutable.table_info().name().clone();
            if !check.table_exists(&name) {
                continue; // dropped in this transaction
            }
            let (added, removed) = mutable.registry().normalized_changes();
            constraints::check_add_violations(
                &check,
                &name,
                &added,
                Deferrability::InitiallyDeferred,
            )?;
            constraints::check_remove_violations(
                &check,
                &name,
                &removed,
                Deferrability::InitiallyDeferred,
            )?;
        }
        drop(check);

        // (vii) Stage post-commit events.
        let changed: Vec<u64> = tx
            .touched_tables()
            .iter()
            .filter(|(_, m)| !m.registry().is_empty())
            .map(|(&id, _)| id)
            .collect();
        let has_changes =
            !changed.is_empty() || !tx.created_objects().is_empty() || !tx.dropped_objects().is_empty();
        let new_commit_id = if has_changes { head + 1 } else { head };

        let mut events = Vec::new();
        for &table_id in &changed {
            let mutable = &tx.touched_tables()[&table_id];
            let registry = mutable.registry();
            events.push(CommitEvent::TableChange(TableChangeEvent {
                table: mutable.table_info().name().clone(),
                table_id: TableId(table_id),
                commit_id: new_commit_id,
                added: registry.added_rows(),
                removed: registry.removed_rows(),
            }));
        }
        for (ty, name) in tx.created_objects() {
            events.push(CommitEvent::SchemaChange(SchemaChangeEvent {
                object_type: *ty,
                name: name.clone(),
                action: SchemaAction::Created,
                commit_id: new_commit_id,
            }));
        }
        for (ty, name) in tx.dropped_objects() {
            events.push(CommitEvent::SchemaChange(SchemaChangeEvent {
                object_type: *ty,
                name: name.clone(),
                action: SchemaAction::Dropped,
                commit_id: new_commit_id,
            }));
        }
        events.extend(tx.take_queued_events());

        if !has_changes {
            return Ok(CommitOutcome {
                commit_id: head,
                events,
            });
        }

        // (viii) Publish. Non-cancellable: a storage failure here leaves
        // state already adopted, so the error is escalated to corruption
        // and the database refuses further work.
        self.publish(tx, ctx, new_commit_id, &changed, &mut merged)
            .map_err(|e| {
                Error::Corruption(format!("commit {new_commit_id} failed mid-publish: {e}"))
            })?;

        if !tx.created_objects().is_empty() || !tx.dropped_objects().is_empty() {
            self.object_states.write().push(ObjectCommitState {
                commit_id: new_commit_id,
                created: tx.created_objects().to_vec(),
                dropped: tx.dropped_objects().to_vec(),
            });
        }
        self.commit_id.store(new_commit_id, Ordering::SeqCst);

        Ok(CommitOutcome {
            commit_id: new_commit_id,
            events,
        })
    }

    fn publish(
        &self,
        tx: &Transaction,
        ctx: &CommitContext<'_>,
        new_commit_id: u64,
        changed: &[u64],
        merged: &mut BTreeMap<u64, MergedTable>,
    ) -> Result<()> {
        for &table_id in changed {
            let mutable = &tx.touched_tables()[&table_id];
            let MergedTable { indexes, new_info } =
                merged.remove(&table_id).expect("merged in stage (v)");
            let mut registry = mutable.registry().clone();
            registry.seal(new_commit_id);
            mutable.source().commit_transaction_change(
                new_commit_id,
                Arc::new(registry),
                indexes,
                new_info,
            );
            mutable.source().persist()?;
        }

        // Drops before creates: a table dropped and re-created under the
        // same name must retire the old entry, not the new one.
        let ddl = !tx.created_sources().is_empty() || !tx.dropped_table_sources().is_empty();
        for (&table_id, source) in tx.dropped_table_sources() {
            let name = source.name();
            ctx.sources.retire(&name);
            ctx.state_store.remove_visible(&name.to_string())?;
            ctx.state_store
                .add_delete(TableSourceState::new(table_id, name.to_string()))?;
        }
        for source in tx.created_sources() {
            ctx.source_dir.set(source.table_id(), source.area_id());
            ctx.state_store.add_visible(TableSourceState::new(
                source.table_id().0,
                source.name().to_string(),
            ))?;
            ctx.sources.publish(source.clone());
            source.persist()?;
        }
        if ddl {
            ctx.source_dir.persist()?;
        }
        ctx.state_store.flush()?;
        ctx.store.flush()
    }
}

struct MergedTable {
    indexes: Arc<crate::indexset::IndexSetSnapshot>,
    new_info: Option<Arc<lattice_core::TableInfo>>,
}
