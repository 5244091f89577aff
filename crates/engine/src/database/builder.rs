//! Database builder
//!
//! `Database::open` and `Database::in_memory` cover the common cases;
//! the builder exists for overriding the configuration or wiring in a
//! real privilege resolver.

use super::config::DatabaseConfig;
use super::Database;
use lattice_core::{AllowAll, PrivilegeResolver, Result};
use lattice_store::{AreaStore, FileStore, MemoryStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Name of the store file inside the data directory.
pub const STORE_FILE_NAME: &str = "lattice.db";

/// Configurable opener for [`Database`].
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    config: Option<DatabaseConfig>,
    privileges: Arc<dyn PrivilegeResolver>,
}

impl DatabaseBuilder {
    /// Builder with defaults: in-memory, default config, allow-all
    /// privileges.
    pub fn new() -> Self {
        DatabaseBuilder {
            path: None,
            config: None,
            privileges: Arc::new(AllowAll),
        }
    }

    /// Store the database in `dir` (created if absent). Without a path
    /// the database is in-memory.
    pub fn path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.path = Some(dir.into());
        self
    }

    /// Override the configuration instead of reading `lattice.toml`.
    pub fn config(mut self, config: DatabaseConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Wire in the external privilege manager.
    pub fn privileges(mut self, resolver: Arc<dyn PrivilegeResolver>) -> Self {
        self.privileges = resolver;
        self
    }

    /// Open the database.
    pub fn open(self) -> Result<Arc<Database>> {
        match self.path {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                let config = match self.config {
                    Some(config) => config,
                    None => DatabaseConfig::load_or_create(&dir)?,
                };
                let store_path = dir.join(STORE_FILE_NAME);
                let (store, fresh): (Arc<dyn AreaStore>, bool) = if store_path.exists() {
                    info!(path = %store_path.display(), "opening database");
                    (Arc::new(FileStore::open(&store_path)?), false)
                } else {
                    info!(path = %store_path.display(), "creating database");
                    (Arc::new(FileStore::create(&store_path)?), true)
                };
                Database::boot(store, fresh, config, self.privileges)
            }
            None => {
                let config = self.config.unwrap_or_default();
                let store: Arc<dyn AreaStore> = Arc::new(MemoryStore::new());
                Database::boot(store, true, config, self.privileges)
            }
        }
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
