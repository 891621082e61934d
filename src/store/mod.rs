//! # Entity Registry
//!
//! In-memory registry of live sandboxes and containers.
//!
//! ## Structure
//!
//! ```text
//! EntityStore<T>
//! ├── entities: full ID → T
//! └── index:    TruncIndex (prefix → full ID)
//!
//! NameIndex (separate, acquired before the entity exists)
//! └── name → full ID
//! ```
//!
//! ## Concurrency
//!
//! Mutations take the single writer lock and update both maps before
//! releasing it, so readers never observe an entity that is in one map
//! but not the other. No operation performs external I/O under the lock.

mod container;
mod name_index;
mod sandbox;
mod status;
mod truncindex;

pub use container::{Container, ContainerMetadata};
pub use name_index::NameIndex;
pub use sandbox::{Sandbox, SandboxMetadata};
pub use status::{ContainerState, Status, StatusStorage};
pub use truncindex::TruncIndex;

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Anything stored in an [`EntityStore`].
pub trait Entity: Clone + Send + Sync + 'static {
    /// Full, immutable ID.
    fn id(&self) -> &str;
}

struct Inner<T> {
    entities: HashMap<String, T>,
    index: TruncIndex,
}

/// Thread-safe registry keyed by full ID with unique-prefix lookup.
pub struct EntityStore<T: Entity> {
    inner: RwLock<Inner<T>>,
}

impl<T: Entity> Default for EntityStore<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entities: HashMap::new(),
                index: TruncIndex::new(),
            }),
        }
    }
}

impl<T: Entity> EntityStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyExists`] if the full ID is present
    /// - [`Error::InvalidId`] if the ID cannot be indexed
    pub fn add(&self, entity: T) -> Result<()> {
        let mut inner = self.write()?;
        let id = entity.id().to_string();
        if inner.entities.contains_key(&id) {
            return Err(Error::AlreadyExists(id));
        }
        inner.index.add(&id)?;
        inner.entities.insert(id, entity);
        Ok(())
    }

    /// Looks up by full ID or unique prefix.
    ///
    /// Zero or several matches are both [`Error::NotFound`].
    pub fn get(&self, id_or_prefix: &str) -> Result<T> {
        let inner = self.read()?;
        let id = inner.index.get(id_or_prefix)?;
        inner
            .entities
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    /// Returns a snapshot of every entity.
    pub fn list(&self) -> Result<Vec<T>> {
        Ok(self.read()?.entities.values().cloned().collect())
    }

    /// Removes by full ID or unique prefix.
    ///
    /// Returns the removed entity; an unresolved ID is not an error.
    pub fn delete(&self, id_or_prefix: &str) -> Result<Option<T>> {
        let mut inner = self.write()?;
        let Ok(id) = inner.index.get(id_or_prefix) else {
            return Ok(None);
        };
        inner.index.delete(&id);
        Ok(inner.entities.remove(&id))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.entities.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner<T>>> {
        self.inner
            .read()
            .map_err(|_| Error::Internal("entity store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner<T>>> {
        self.inner
            .write()
            .map_err(|_| Error::Internal("entity store lock poisoned".to_string()))
    }
}
