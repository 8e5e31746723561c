use super::{FlagStore, StoreError};
use std::collections::HashMap;

/// In-memory store with commit failure injection
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    staged: HashMap<String, bool>,
    committed: HashMap<String, bool>,
    pub fail_commits: bool,
    pub commits: usize,
}

impl MemoryFlagStore {
    pub fn with_flags(flags: &[(&str, bool)]) -> Self {
        let committed: HashMap<String, bool> =
            flags.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        Self {
            staged: committed.clone(),
            committed,
            ..Self::default()
        }
    }

    pub fn committed(&self, key: &str) -> Option<bool> {
        self.committed.get(key).copied()
    }
}

impl FlagStore for MemoryFlagStore {
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.staged.get(key).copied()
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError> {
        self.staged.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.fail_commits {
            return Err(StoreError::Rejected("injected failure".into()));
        }
        self.committed = self.staged.clone();
        self.commits += 1;
        Ok(())
    }
}
