//! Remote declarative store contract.
//!
//! Steps never talk to a concrete wire client. They depend on [`ImageStore`],
//! which exposes the get/create/update operations of an image-stream API with
//! optimistic concurrency: every resource carries a `resourceVersion` token
//! that must be echoed unchanged on update.
//!
//! - [`MemoryStore`] - Thread-safe in-process store with fault injection
//! - [`FileStore`] - A [`MemoryStore`] persisted to a JSON state file

pub mod file;
pub mod memory;
pub mod types;

pub use file::FileStore;
pub use memory::{MemoryStore, RegistryHosts, StoreCalls, StoreOp};
pub use types::{
    Image, ImageStream, ImageStreamStatus, ImageStreamTag, ObjectMeta, ObjectReference,
    StatusTag, TagReference, TagReferencePolicy, TagReferencePolicyType, PIPELINE_IMAGE_STREAM,
    STABLE_IMAGE_STREAM,
};

use thiserror::Error;

/// Errors reported by an [`ImageStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The requested resource does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// A create collided with an existing resource.
    #[error("{name} already exists")]
    AlreadyExists { name: String },

    /// An update carried a stale concurrency token.
    #[error("conflict updating {name}: the object has been modified")]
    Conflict { name: String },

    /// Any other failure talking to the store.
    #[error("{0}")]
    Io(String),
}

impl StoreError {
    /// Returns true for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Returns true for [`StoreError::AlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// Returns true for [`StoreError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result of a single store call.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The operations a step needs from the remote image-stream API.
///
/// Implementations must be safe to share between concurrently running steps.
/// Tag names take the `stream:tag` form.
pub trait ImageStore: Send + Sync {
    /// Fetch an image stream tag.
    fn get_tag(&self, namespace: &str, name: &str) -> StoreResult<ImageStreamTag>;

    /// Create an image stream tag. Fails with `AlreadyExists` if present.
    fn create_tag(&self, tag: &ImageStreamTag) -> StoreResult<ImageStreamTag>;

    /// Replace an image stream tag. Fails with `Conflict` if the
    /// `resourceVersion` does not match the stored one.
    fn update_tag(&self, tag: &ImageStreamTag) -> StoreResult<ImageStreamTag>;

    /// Fetch an image stream.
    fn get_stream(&self, namespace: &str, name: &str) -> StoreResult<ImageStream>;
}
