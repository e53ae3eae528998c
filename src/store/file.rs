//! JSON-file backed image store.
//!
//! Lets separate invocations of the CLI observe each other's writes, so a
//! pipeline interrupted half-way can be re-run and skip what is already done.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use super::memory::{MemoryStore, RegistryHosts, StoreState};
use super::types::{ImageStream, ImageStreamTag};
use super::{ImageStore, StoreError, StoreResult};
use crate::error::{Result, TagflowError};

/// A [`MemoryStore`] saved to disk after every successful write.
///
/// A write whose save fails is undone, so the in-memory view never runs
/// ahead of the file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    // Held across a write and its save so saves land in order.
    save_lock: Mutex<()>,
}

impl FileStore {
    /// Open the state file at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<StoreState>(&content).map_err(|e| {
                TagflowError::ConfigParseError {
                    path: path.clone(),
                    message: e.to_string(),
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(TagflowError::Io(e)),
        };
        debug!(
            "Opened store {} with {} tag(s)",
            path.display(),
            state.tags.len()
        );
        Ok(Self {
            path,
            inner: MemoryStore::from_state(state),
            save_lock: Mutex::new(()),
        })
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Override the registry hosts and persist them.
    pub fn set_registries(&self, registries: RegistryHosts) -> Result<()> {
        self.persist(|inner| {
            inner.set_registries(registries);
            Ok(())
        })
        .map_err(|e| TagflowError::Other(anyhow::anyhow!(e)))
    }

    /// Seed `namespace/stream:tag` as resolving to `digest` and persist it.
    pub fn tag_image(&self, namespace: &str, stream: &str, tag: &str, digest: &str) -> Result<()> {
        self.persist(|inner| {
            inner.tag_image(namespace, stream, tag, digest);
            Ok(())
        })
        .map_err(|e| TagflowError::Other(anyhow::anyhow!(e)))
    }

    fn lock_saves(&self) -> MutexGuard<'_, ()> {
        self.save_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `write` to the in-memory store and save, undoing it if the
    /// save fails.
    fn persist<T>(&self, write: impl FnOnce(&MemoryStore) -> StoreResult<T>) -> StoreResult<T> {
        let _guard = self.lock_saves();
        let before = self.inner.snapshot();
        let value = write(&self.inner)?;
        if let Err(e) = self.write_file() {
            warn!("Undoing write, could not save {}: {}", self.path.display(), e);
            self.inner.restore(before);
            return Err(e);
        }
        Ok(value)
    }

    fn write_file(&self) -> StoreResult<()> {
        let state = self.inner.snapshot();
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| StoreError::Io(format!("serialize store: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Io(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        fs::write(&self.path, json)
            .map_err(|e| StoreError::Io(format!("write {}: {}", self.path.display(), e)))
    }
}

impl ImageStore for FileStore {
    fn get_tag(&self, namespace: &str, name: &str) -> StoreResult<ImageStreamTag> {
        self.inner.get_tag(namespace, name)
    }

    fn create_tag(&self, tag: &ImageStreamTag) -> StoreResult<ImageStreamTag> {
        self.persist(|inner| inner.create_tag(tag))
    }

    fn update_tag(&self, tag: &ImageStreamTag) -> StoreResult<ImageStreamTag> {
        self.persist(|inner| inner.update_tag(tag))
    }

    fn get_stream(&self, namespace: &str, name: &str) -> StoreResult<ImageStream> {
        self.inner.get_stream(namespace, name)
    }
}
