//! Database struct and open/close logic
//!
//! [`Database`] boots the paged store, validates the root area, opens the
//! table state store, reloads every visible table source, reclaims
//! pending-delete sources left from earlier runs, and owns the commit
//! manager, lock manager, catalog, and event dispatcher.
//!
//! # Root area (32 bytes, little-endian)
//!
//! The root is the first area the store hands out and bootstraps
//! everything else:
//!
//! ```text
//! ┌───────────┬─────────────┬──────────────────┬───────────────────┬────────────────┐
//! │ Magic (4) │ Version (4) │ StateHeader (8)  │ SourceDir (8)     │ Catalog (8)    │
//! └───────────┴─────────────┴──────────────────┴───────────────────┴────────────────┘
//! ```

mod builder;
mod config;

pub use builder::DatabaseBuilder;
pub use config::{DatabaseConfig, CONFIG_FILE_NAME};

use crate::catalog::{Catalog, CatalogChange};
use crate::events::EventDispatcher;
use dashmap::DashMap;
use lattice_core::{
    Error, IdentCase, ObjectName, PrivilegeResolver, Result, TableId, TableInfo,
};
use lattice_store::{AreaId, AreaStore, TableStateStore};
use lattice_txn::{
    CommitContext, CommitManager, LockManager, SourceDirectory, SourceRegistry, TableSource,
    Transaction,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Magic bytes identifying a Lattice database root area.
const ROOT_MAGIC: [u8; 4] = *b"LTDB";
/// Current root format version.
const ROOT_VERSION: u32 = 1;
/// The root is always the first area the store allocates.
const ROOT_AREA: AreaId = AreaId(1);

/// An open Lattice database.
///
/// Create one through [`Database::open`], [`Database::in_memory`], or
/// [`DatabaseBuilder`]; interact through [`Session`]s obtained from
/// [`Database::session`].
///
/// [`Session`]: crate::session::Session
pub struct Database {
    store: Arc<dyn AreaStore>,
    state_store: TableStateStore,
    source_dir: SourceDirectory,
    sources: SourceRegistry,
    manager: CommitManager,
    locks: Arc<LockManager>,
    catalog: Catalog,
    events: EventDispatcher,
    config: DatabaseConfig,
    ident_case: IdentCase,
    privileges: Arc<dyn PrivilegeResolver>,
    open_txs: DashMap<u64, u64>,
    poisoned: AtomicBool,
}

impl Database {
    /// Open (or create) a database in `dir` with the configuration from
    /// its `lattice.toml`.
    pub fn open(dir: impl Into<std::path::PathBuf>) -> Result<Arc<Database>> {
        DatabaseBuilder::new().path(dir).open()
    }

    /// Fully in-memory database with default configuration.
    pub fn in_memory() -> Result<Arc<Database>> {
        DatabaseBuilder::new().open()
    }

    pub(crate) fn boot(
        store: Arc<dyn AreaStore>,
        fresh: bool,
        config: DatabaseConfig,
        privileges: Arc<dyn PrivilegeResolver>,
    ) -> Result<Arc<Database>> {
        let ident_case = config.ident_case()?;
        let (state_store, source_dir, catalog) = if fresh {
            Self::format(&store)?
        } else {
            Self::load(&store)?
        };

        let sources = SourceRegistry::new();
        for entry in state_store.visible_tables() {
            let area = source_dir.get(TableId(entry.table_id)).ok_or_else(|| {
                Error::Corruption(format!(
                    "visible table {} ('{}') has no source area",
                    entry.table_id, entry.name
                ))
            })?;
            let source = TableSource::open(store.clone(), TableId(entry.table_id), area)?;
            sources.publish(source);
        }

        let db = Arc::new(Database {
            locks: Arc::new(LockManager::with_timeout(config.lock_timeout())),
            events: EventDispatcher::new(config.event_queue_depth),
            manager: CommitManager::new(0),
            state_store,
            source_dir,
            sources,
            catalog,
            store,
            config,
            ident_case,
            privileges,
            open_txs: DashMap::new(),
            poisoned: AtomicBool::new(false),
        });

        // No transaction can pin a pending-delete source at boot, so the
        // leftovers from earlier runs are reclaimed now.
        db.reclaim_pending_deletes()?;
        info!(
            tables = db.sources.visible_sources().len(),
            "database ready"
        );
        Ok(db)
    }

    fn format(
        store: &Arc<dyn AreaStore>,
    ) -> Result<(TableStateStore, SourceDirectory, Catalog)> {
        let root = store.create_area(32)?;
        if root.id() != ROOT_AREA {
            return Err(Error::InvalidState(format!(
                "root must be the store's first area, got {}",
                root.id()
            )));
        }
        let (state_store, state_header) = TableStateStore::create(store.clone())?;
        let source_dir = SourceDirectory::create(&**store)?;
        let catalog = Catalog::create(store.clone())?;

        root.write(0, &ROOT_MAGIC)?;
        root.write_u32(4, ROOT_VERSION)?;
        root.write_u64(8, state_header.0)?;
        root.write_u64(16, source_dir.area_id().0)?;
        root.write_u64(24, catalog.area_id().0)?;
        store.flush()?;
        Ok((state_store, source_dir, catalog))
    }

    fn load(store: &Arc<dyn AreaStore>) -> Result<(TableStateStore, SourceDirectory, Catalog)> {
        let root = store.get_area(ROOT_AREA, false)?;
        let mut magic = [0u8; 4];
        root.read(0, &mut magic)?;
        if magic != ROOT_MAGIC {
            return Err(Error::Corruption("root area has wrong magic".into()));
        }
        let version = root.read_u32(4)?;
        if version != ROOT_VERSION {
            return Err(Error::Corruption(format!(
                "root version {version} not supported"
            )));
        }
        let state_store = TableStateStore::open(store.clone(), AreaId(root.read_u64(8)?))?;
        let source_dir = SourceDirectory::open(&**store, AreaId(root.read_u64(16)?))?;
        let catalog = Catalog::open(store.clone(), AreaId(root.read_u64(24)?))?;
        Ok((state_store, source_dir, catalog))
    }

    fn check_usable(&self) -> Result<()> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(Error::Corruption(
                "database is unusable after an earlier corruption error".into(),
            ));
        }
        Ok(())
    }

    /// Active configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Identifier case rule, for building [`ObjectName`]s.
    pub fn ident_case(&self) -> IdentCase {
        self.ident_case
    }

    /// Fold a dotted name per the database's identifier rule.
    pub fn object_name(&self, qualified: &str) -> ObjectName {
        ObjectName::parse(qualified, self.ident_case)
    }

    /// The lock manager.
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// The object catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The event dispatcher.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// The privilege callback.
    pub fn privileges(&self) -> &Arc<dyn PrivilegeResolver> {
        &self.privileges
    }

    /// The latest published commit-id.
    pub fn current_commit_id(&self) -> u64 {
        self.manager.current_commit_id()
    }

    /// Open a session for `user`.
    pub fn session(self: &Arc<Self>, user: impl Into<String>) -> crate::session::Session {
        crate::session::Session::new(self.clone(), user.into())
    }

    fn commit_ctx(&self) -> CommitContext<'_> {
        CommitContext {
            store: &self.store,
            sources: &self.sources,
            state_store: &self.state_store,
            source_dir: &self.source_dir,
            error_on_dirty_select: self.config.error_on_dirty_select,
        }
    }

    /// Begin a serializable transaction over the current visible state.
    pub fn begin_transaction(&self) -> Result<Transaction> {
        self.check_usable()?;
        let tx = self.manager.begin_transaction(&self.sources);
        self.open_txs.insert(tx.id(), tx.begin_commit_id());
        Ok(tx)
    }

    /// Run the commit pipeline for `tx`, deliver its events, and reclaim
    /// whatever the commit made unreachable.
    pub fn commit_transaction(&self, tx: &mut Transaction) -> Result<u64> {
        self.check_usable()?;
        let result = self.manager.commit(tx, &self.commit_ctx());
        self.open_txs.remove(&tx.id());
        match result {
            Ok(outcome) => {
                self.events.publish(outcome.events);
                self.reclaim();
                Ok(outcome.commit_id)
            }
            Err(e) => {
                if e.is_fatal() {
                    warn!(error = %e, "fatal commit error; poisoning database");
                    self.poisoned.store(true, Ordering::SeqCst);
                }
                Err(e)
            }
        }
    }

    /// Roll `tx` back, discarding its journals, staged rows, and created
    /// sources with no effect on the visible state.
    pub fn rollback_transaction(&self, tx: &mut Transaction) -> Result<()> {
        let result = self.manager.rollback(tx, &self.commit_ctx());
        self.open_txs.remove(&tx.id());
        self.reclaim();
        result
    }

    /// Allocate a table id, create its source, and register the creation
    /// in `tx`. The table is visible (and writable) inside `tx` at once;
    /// globally it appears when `tx` commits.
    pub fn create_table(&self, tx: &mut Transaction, info: TableInfo) -> Result<TableId> {
        self.check_usable()?;
        let table_id = TableId(self.state_store.next_table_id()?);
        let source = TableSource::create(self.store.clone(), table_id, Arc::new(info))?;
        tx.create_table(source)?;
        Ok(table_id)
    }

    /// Apply catalog changes of a committed transaction and persist.
    pub(crate) fn apply_catalog_changes(&self, changes: Vec<CatalogChange>) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        for change in changes {
            match change {
                CatalogChange::Create(object) => self.catalog.insert(object),
                CatalogChange::Drop(ty, name) => {
                    self.catalog.remove(ty, &name)?;
                    if ty == lattice_core::ObjectType::Trigger {
                        self.events.unregister_trigger(&name);
                    }
                }
            }
        }
        self.catalog.persist()?;
        self.store.flush()
    }

    /// Drop history no open transaction can observe and physically
    /// reclaim retired sources nothing pins any more.
    pub fn reclaim(&self) {
        let min_begin = self
            .open_txs
            .iter()
            .map(|e| *e.value())
            .min()
            .unwrap_or_else(|| self.manager.current_commit_id());
        self.manager.truncate_history(min_begin, &self.sources);

        let reclaimable = self.sources.take_reclaimable();
        if reclaimable.is_empty() {
            return;
        }
        for source in reclaimable {
            let name = source.name();
            info!(table = %name, "reclaiming dropped table");
            if let Err(e) = self.state_store.remove_delete(&name.to_string()) {
                warn!(table = %name, error = %e, "pending-delete entry missing");
            }
            self.source_dir.remove(source.table_id());
            let _ = self.store.delete_area(source.area_id());
        }
        if let Err(e) = self
            .source_dir
            .persist()
            .and_then(|_| self.state_store.flush())
        {
            warn!(error = %e, "failed to persist reclamation");
        }
    }

    fn reclaim_pending_deletes(&self) -> Result<()> {
        let pending = self.state_store.delete_tables();
        if pending.is_empty() {
            return Ok(());
        }
        for entry in pending {
            info!(table = %entry.name, "reclaiming table dropped before shutdown");
            if let Some(area) = self.source_dir.get(TableId(entry.table_id)) {
                let _ = self.store.delete_area(area);
                self.source_dir.remove(TableId(entry.table_id));
            }
            self.state_store.remove_delete(&entry.name)?;
        }
        self.source_dir.persist()?;
        self.state_store.flush()
    }

    /// Number of open transactions (diagnostics).
    pub fn open_transaction_count(&self) -> usize {
        self.open_txs.len()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.sources.visible_sources().len())
            .field("commit_id", &self.manager.current_commit_id())
            .field("open_txs", &self.open_txs.len())
            .finish()
    }
}
