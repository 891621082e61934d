//! # Local Image Store
//!
//! Images are pulled and unpacked by an external image service; the shim
//! only needs to resolve a reference to metadata that is already present
//! on the node. [`ImageStore`] is that lookup table.
//!
//! ## Resolution
//!
//! | Input                      | Matches                              |
//! |----------------------------|--------------------------------------|
//! | `nginx:1.25`               | exact reference                      |
//! | `nginx`                    | `nginx:latest` (default tag)         |
//! | `sha256:<hex>` / `<hex>`   | image ID                             |
//!
//! Nothing here touches the network: an unknown reference is simply absent.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Default tag applied to references without tag or digest.
pub const DEFAULT_TAG: &str = "latest";

/// Digest algorithm prefix of image IDs.
const ID_PREFIX: &str = "sha256:";

/// Runtime configuration carried by an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    /// Declared volume destinations.
    pub volumes: BTreeMap<String, serde_json::Value>,
}

/// Metadata for an image present on the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image ID (`sha256:<hex>` of the config).
    pub id: String,
    /// References pointing at this image.
    pub references: Vec<String>,
    /// Size in bytes (sum of layers).
    pub size: u64,
    pub config: ImageConfig,
}

impl Image {
    /// Creates image metadata with a single reference.
    pub fn new(id: impl Into<String>, reference: impl Into<String>, config: ImageConfig) -> Self {
        Self {
            id: id.into(),
            references: vec![reference.into()],
            size: 0,
            config,
        }
    }
}

#[derive(Default)]
struct ImageIndex {
    images: HashMap<String, Image>,
    references: HashMap<String, String>,
}

/// Thread-safe table of locally available images.
#[derive(Default)]
pub struct ImageStore {
    inner: RwLock<ImageIndex>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an image, replacing earlier metadata with the same ID.
    ///
    /// References already pointing at another image are repointed.
    pub fn add(&self, image: Image) -> Result<()> {
        if image.id.is_empty() {
            return Err(Error::InvalidId {
                id: image.id,
                reason: "image id must not be empty".to_string(),
            });
        }
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::Internal("image store lock poisoned".to_string()))?;
        for reference in &image.references {
            inner
                .references
                .insert(normalize_reference(reference), image.id.clone());
        }
        inner.images.insert(image.id.clone(), image);
        Ok(())
    }

    /// Resolves a reference or image ID to local metadata.
    pub fn resolve(&self, reference: &str) -> Result<Option<Image>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::Internal("image store lock poisoned".to_string()))?;

        if let Some(id) = inner.references.get(&normalize_reference(reference)) {
            return Ok(inner.images.get(id).cloned());
        }
        let id = if reference.starts_with(ID_PREFIX) {
            reference.to_string()
        } else {
            format!("{ID_PREFIX}{reference}")
        };
        Ok(inner.images.get(&id).cloned())
    }

    /// Removes an image and every reference to it.
    pub fn remove(&self, id: &str) -> Result<Option<Image>> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::Internal("image store lock poisoned".to_string()))?;
        inner.references.retain(|_, target| target != id);
        Ok(inner.images.remove(id))
    }

    /// Lists all images.
    pub fn list(&self) -> Result<Vec<Image>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::Internal("image store lock poisoned".to_string()))?;
        Ok(inner.images.values().cloned().collect())
    }
}

/// Appends the default tag when a reference has neither tag nor digest.
pub fn normalize_reference(reference: &str) -> String {
    if reference.contains('@') {
        return reference.to_string();
    }
    let name = reference.rsplit('/').next().unwrap_or(reference);
    if name.contains(':') {
        reference.to_string()
    } else {
        format!("{reference}:{DEFAULT_TAG}")
    }
}
