use super::{FlagStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct FlagFile {
    #[serde(default)]
    flags: BTreeMap<String, bool>,
}

/// Flag store backed by a small TOML file.
///
/// Commits write and sync a sibling temp file, then rename it over the flag
/// file, so a power cut leaves either the old or the new flags on disk. All
/// calls block; async callers go through [`persist_flags`].
///
/// [`persist_flags`]: super::persist_flags
#[derive(Debug)]
pub struct TomlFlagStore {
    path: PathBuf,
    staged: FlagFile,
    committed: FlagFile,
}

impl TomlFlagStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let committed = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            info!("No flag file at {}, starting blank", path.display());
            FlagFile::default()
        };

        Ok(Self {
            path,
            staged: committed.clone(),
            committed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.staged != self.committed
    }
}

impl FlagStore for TomlFlagStore {
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.staged.flags.get(key).copied()
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError> {
        self.staged.flags.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.is_dirty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self.staged)?;
        let tmp = self.path.with_extension("toml.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        if let Some(parent) = self.path.parent() {
            // Persist the rename itself
            File::open(parent)?.sync_all()?;
        }

        self.committed = self.staged.clone();
        debug!("Committed flags to {}", self.path.display());
        Ok(())
    }
}
