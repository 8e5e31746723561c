//! Persistent boolean flags
//!
//! Two flags survive restarts: [`CONFIGURED_KEY`] (the node has joined its
//! network once) and [`PROVISIONED_KEY`] (a controller has claimed it). Writes
//! are staged until [`FlagStore::commit`].

pub mod file;
#[cfg(test)]
pub mod memory;

pub use file::TomlFlagStore;

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task;

pub const CONFIGURED_KEY: &str = "is_configured";
pub const PROVISIONED_KEY: &str = "is_provisioned";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Flag store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Flag file is corrupt: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to encode flags: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("Commit rejected: {0}")]
    Rejected(String),
}

pub trait FlagStore: Send {
    /// Staged value of `key`, `None` if never written
    fn get_bool(&self, key: &str) -> Option<bool>;

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError>;

    /// Makes every staged write durable
    fn commit(&mut self) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<Mutex<dyn FlagStore>>;

pub fn shared<S: FlagStore + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Stages and commits several flags under one lock. Stores block on I/O, so
/// the work runs on the blocking pool.
pub async fn persist_flags(store: &SharedStore, flags: &[(&str, bool)]) -> Result<(), StoreError> {
    let store = store.clone();
    let flags: Vec<(String, bool)> = flags.iter().map(|(k, v)| (k.to_string(), *v)).collect();

    task::spawn_blocking(move || {
        let mut store = store.blocking_lock();
        for (key, value) in &flags {
            store.set_bool(key, *value)?;
        }
        store.commit()
    })
    .await
    .map_err(|e| StoreError::Rejected(format!("commit task failed: {e}")))?
}

pub async fn read_flag(store: &SharedStore, key: &str) -> bool {
    store.lock().await.get_bool(key).unwrap_or(false)
}
