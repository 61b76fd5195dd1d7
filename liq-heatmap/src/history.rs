use crate::{error::TierError, tier::MarginTierTable};
use std::sync::Arc;

/// Versioned record of the [`MarginTierTable`]s published for one symbol.
///
/// Tables are never mutated. [`replace`](Self::replace) supersedes the current table with a
/// new one, and superseded versions stay available for audit and [`rollback`](Self::rollback).
#[derive(Clone, Debug)]
pub struct TierTableHistory {
    versions: Vec<Arc<MarginTierTable>>,
    current: usize,
}

impl TierTableHistory {
    pub fn new(initial: MarginTierTable) -> Self {
        Self {
            versions: vec![Arc::new(initial)],
            current: 0,
        }
    }

    /// Table that new engine runs should use.
    pub fn current(&self) -> Arc<MarginTierTable> {
        Arc::clone(&self.versions[self.current])
    }

    /// Look up a retained version by name.
    pub fn get(&self, version: &str) -> Option<Arc<MarginTierTable>> {
        self.versions
            .iter()
            .find(|table| table.version() == version)
            .cloned()
    }

    /// Every retained version, oldest first.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|table| table.version())
    }

    /// Supersede the current table. Engines already holding the old `Arc` are unaffected.
    pub fn replace(&mut self, table: MarginTierTable) -> Result<Arc<MarginTierTable>, TierError> {
        if self.get(table.version()).is_some() {
            return Err(TierError::DuplicateVersion(table.version().to_string()));
        }

        self.versions.push(Arc::new(table));
        self.current = self.versions.len() - 1;
        Ok(self.current())
    }

    /// Make the version preceding the current one current again.
    ///
    /// Returns `None`, leaving the history unchanged, when already at the oldest version.
    pub fn rollback(&mut self) -> Option<Arc<MarginTierTable>> {
        self.current = self.current.checked_sub(1)?;
        Some(self.current())
    }
}
