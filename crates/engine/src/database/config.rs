//! Database configuration via `lattice.toml`
//!
//! A config file lives in the data directory. On first open a default
//! `lattice.toml` is created; to change settings, edit the file and
//! reopen. In-memory databases use the defaults unless the builder
//! overrides them.

use lattice_core::{Error, IdentCase, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "lattice.toml";

/// Database configuration loaded from `lattice.toml`.
///
/// # Example
///
/// ```toml
/// # Reject a commit when a table it selected from was modified and
/// # committed by a concurrent transaction.
/// error_on_dirty_select = false
///
/// # Identifier comparison: "sensitive" or "insensitive"
/// identifier_case = "sensitive"
///
/// # Upper bound on lock waits, in milliseconds
/// lock_timeout_ms = 10000
///
/// # Bounded depth of the post-commit event queue
/// event_queue_depth = 256
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Reject commits whose read tables were concurrently modified.
    #[serde(default)]
    pub error_on_dirty_select: bool,
    /// Identifier comparison rule: `"sensitive"` or `"insensitive"`.
    #[serde(default = "default_identifier_case")]
    pub identifier_case: String,
    /// Upper bound on lock waits, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Bounded depth of the post-commit event queue.
    #[serde(default = "default_event_queue_depth")]
    pub event_queue_depth: usize,
}

fn default_identifier_case() -> String {
    "sensitive".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_event_queue_depth() -> usize {
    256
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            error_on_dirty_select: false,
            identifier_case: default_identifier_case(),
            lock_timeout_ms: default_lock_timeout_ms(),
            event_queue_depth: default_event_queue_depth(),
        }
    }
}

impl DatabaseConfig {
    /// Parse the identifier case rule.
    pub fn ident_case(&self) -> Result<IdentCase> {
        match self.identifier_case.as_str() {
            "sensitive" => Ok(IdentCase::Sensitive),
            "insensitive" => Ok(IdentCase::Insensitive),
            other => Err(Error::InvalidState(format!(
                "identifier_case must be \"sensitive\" or \"insensitive\", got \"{other}\""
            ))),
        }
    }

    /// Lock wait bound as a duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Load the config from `dir`, creating a default file when absent.
    pub fn load_or_create(dir: &Path) -> Result<DatabaseConfig> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let config: DatabaseConfig = toml::from_str(&text)
                .map_err(|e| Error::InvalidState(format!("{}: {e}", path.display())))?;
            config.ident_case()?;
            Ok(config)
        } else {
            let config = DatabaseConfig::default();
            let text = toml::to_string_pretty(&config)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            std::fs::write(&path, text)?;
            info!(path = %path.display(), "wrote default config");
            Ok(config)
        }
    }
}
