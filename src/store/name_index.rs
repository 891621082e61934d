//! Name reservation index.
//!
//! Names are reserved before the entity they belong to exists, so two
//! concurrent creations with the same name are serialized here rather than
//! in the entity store. The index is independent of the ID index.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Thread-safe `name → key` reservations.
#[derive(Debug, Default)]
pub struct NameIndex {
    names: Mutex<HashMap<String, String>>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name` for `key`.
    ///
    /// Reserving a name already held by the same key succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::NameConflict`] if another key holds the name
    /// - [`Error::InvalidId`] for an empty name or key
    pub fn reserve(&self, name: &str, key: &str) -> Result<()> {
        if name.is_empty() || key.is_empty() {
            return Err(Error::InvalidId {
                id: format!("{name}/{key}"),
                reason: "name and key must not be empty".to_string(),
            });
        }
        let mut names = self.lock()?;
        match names.get(name) {
            Some(holder) if holder == key => Ok(()),
            Some(holder) => Err(Error::NameConflict {
                name: name.to_string(),
                holder: holder.clone(),
            }),
            None => {
                names.insert(name.to_string(), key.to_string());
                Ok(())
            }
        }
    }

    /// Releases a reservation by name. No-op if absent.
    pub fn release_by_name(&self, name: &str) -> Result<()> {
        self.lock()?.remove(name);
        Ok(())
    }

    /// Releases every name held by `key`. No-op if absent.
    pub fn release_by_key(&self, key: &str) -> Result<()> {
        self.lock()?.retain(|_, holder| holder != key);
        Ok(())
    }

    /// Returns the key holding `name`.
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.names
            .lock()
            .map_err(|_| Error::Internal("name index lock poisoned".to_string()))
    }
}
