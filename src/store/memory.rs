//! In-process image store.
//!
//! [`MemoryStore`] behaves like the remote image-stream API as far as steps
//! can observe: creates collide with `AlreadyExists`, updates with a stale
//! `resourceVersion` fail with `Conflict`, every write bumps the version, and
//! tagging an `ImageStreamImage` reference resolves the tag to that digest and
//! records it in the owning stream's status.
//!
//! Faults can be injected per operation so reconciliation paths are testable
//! without a live cluster.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{
    split_tag_name, Image, ImageStream, ImageStreamTag, ObjectMeta, StatusTag,
    IMAGE_STREAM_IMAGE_KIND,
};
use super::{ImageStore, StoreError, StoreResult};

/// Registry hosts used to fill in repository addresses of new streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryHosts {
    /// Cluster-internal registry, e.g. `image-registry.svc:5000`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal: Option<String>,
    /// Externally reachable registry, e.g. `registry.example.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<String>,
}

/// Serializable contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub registries: RegistryHosts,
    /// Streams keyed by `namespace/name`.
    #[serde(default)]
    pub streams: BTreeMap<String, ImageStream>,
    /// Tags keyed by `namespace/stream:tag`.
    #[serde(default)]
    pub tags: BTreeMap<String, ImageStreamTag>,
    #[serde(default)]
    pub last_version: u64,
}

/// Store operations, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetTag,
    CreateTag,
    UpdateTag,
    GetStream,
}

/// Number of calls made per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub get_tag: usize,
    pub create_tag: usize,
    pub update_tag: usize,
    pub get_stream: usize,
}

impl StoreCalls {
    /// Total number of mutating calls.
    pub fn writes(&self) -> usize {
        self.create_tag + self.update_tag
    }
}

#[derive(Debug, Default)]
struct Faults {
    conflicts: u32,
    failures: HashMap<StoreOp, String>,
}

/// Thread-safe in-memory [`ImageStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    faults: Mutex<Faults>,
    calls: Mutex<StoreCalls>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn stream_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

impl MemoryStore {
    /// Create an empty store with no registry hosts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that assigns repository addresses on these hosts.
    pub fn with_registries(registries: RegistryHosts) -> Self {
        Self::from_state(StoreState {
            registries,
            ..Default::default()
        })
    }

    /// Restore a store from a snapshot.
    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Default::default()
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> StoreState {
        lock(&self.state).clone()
    }

    /// Replace the whole contents with `state`.
    pub fn restore(&self, state: StoreState) {
        *lock(&self.state) = state;
    }

    /// Replace the registry hosts used for streams created from now on.
    pub fn set_registries(&self, registries: RegistryHosts) {
        lock(&self.state).registries = registries;
    }

    /// Seed `namespace/stream:tag` as resolving to `digest`, as a build would.
    pub fn tag_image(&self, namespace: &str, stream: &str, tag: &str, digest: &str) {
        let mut state = lock(&self.state);
        let name = format!("{}:{}", stream, tag);
        let version = next_version(&mut state);
        let ist = ImageStreamTag {
            metadata: ObjectMeta {
                name: name.clone(),
                namespace: namespace.to_string(),
                resource_version: version,
                creation_timestamp: Some(Utc::now()),
            },
            tag: None,
            image: Image {
                name: digest.to_string(),
            },
        };
        state.tags.insert(stream_key(namespace, &name), ist);
        record_status_tag(&mut state, namespace, stream, tag, digest);
    }

    /// Insert or replace an image stream as-is.
    pub fn put_stream(&self, stream: ImageStream) {
        let mut state = lock(&self.state);
        let key = stream_key(&stream.metadata.namespace, &stream.metadata.name);
        state.streams.insert(key, stream);
    }

    /// Fail the next `count` updates with `Conflict`.
    pub fn inject_conflicts(&self, count: u32) {
        lock(&self.faults).conflicts = count;
    }

    /// Fail every call of `op` with an I/O error until cleared.
    pub fn fail(&self, op: StoreOp, message: impl Into<String>) {
        lock(&self.faults).failures.insert(op, message.into());
    }

    /// Remove all injected failures.
    pub fn clear_faults(&self) {
        let mut faults = lock(&self.faults);
        faults.conflicts = 0;
        faults.failures.clear();
    }

    /// Calls made so far.
    pub fn calls(&self) -> StoreCalls {
        *lock(&self.calls)
    }

    fn enter(&self, op: StoreOp) -> StoreResult<()> {
        {
            let mut calls = lock(&self.calls);
            match op {
                StoreOp::GetTag => calls.get_tag += 1,
                StoreOp::CreateTag => calls.create_tag += 1,
                StoreOp::UpdateTag => calls.update_tag += 1,
                StoreOp::GetStream => calls.get_stream += 1,
            }
        }
        match lock(&self.faults).failures.get(&op) {
            Some(message) => Err(StoreError::Io(message.clone())),
            None => Ok(()),
        }
    }

    fn take_conflict(&self) -> bool {
        let mut faults = lock(&self.faults);
        if faults.conflicts > 0 {
            faults.conflicts -= 1;
            true
        } else {
            false
        }
    }
}

fn next_version(state: &mut StoreState) -> String {
    state.last_version += 1;
    state.last_version.to_string()
}

fn record_status_tag(state: &mut StoreState, namespace: &str, stream: &str, tag: &str, digest: &str) {
    let registries = state.registries.clone();
    let entry = state
        .streams
        .entry(stream_key(namespace, stream))
        .or_insert_with(|| ImageStream {
            metadata: ObjectMeta {
                name: stream.to_string(),
                namespace: namespace.to_string(),
                resource_version: String::new(),
                creation_timestamp: Some(Utc::now()),
            },
            ..Default::default()
        });
    if entry.status.docker_image_repository.is_empty() {
        if let Some(host) = &registries.internal {
            entry.status.docker_image_repository = format!("{}/{}/{}", host, namespace, stream);
        }
    }
    if entry.status.public_docker_image_repository.is_empty() {
        if let Some(host) = &registries.public {
            entry.status.public_docker_image_repository =
                format!("{}/{}/{}", host, namespace, stream);
        }
    }
    match entry.status.tags.iter_mut().find(|t| t.tag == tag) {
        Some(existing) => existing.image = digest.to_string(),
        None => {
            entry.status.tags.push(StatusTag {
                tag: tag.to_string(),
                image: digest.to_string(),
            });
            entry.status.tags.sort_by(|a, b| a.tag.cmp(&b.tag));
        }
    }
}

/// Digest the tag will resolve to once stored.
fn resolve_image(ist: &ImageStreamTag) -> StoreResult<String> {
    let Some(from) = ist.tag.as_ref().and_then(|t| t.from.as_ref()) else {
        return Ok(ist.image.name.clone());
    };
    if from.kind != IMAGE_STREAM_IMAGE_KIND {
        return Err(StoreError::Io(format!(
            "unsupported tag source kind {}",
            from.kind
        )));
    }
    match from.name.split_once('@') {
        Some((_, digest)) if !digest.is_empty() => Ok(digest.to_string()),
        _ => {
            let namespace = if from.namespace.is_empty() {
                &ist.metadata.namespace
            } else {
                &from.namespace
            };
            Err(StoreError::NotFound {
                kind: "imagestreamimage".to_string(),
                name: stream_key(namespace, &from.name),
            })
        }
    }
}

fn validate_name(ist: &ImageStreamTag) -> StoreResult<(String, String)> {
    split_tag_name(&ist.metadata.name)
        .map(|(stream, tag)| (stream.to_string(), tag.to_string()))
        .ok_or_else(|| {
            StoreError::Io(format!(
                "invalid image stream tag name {:?}: expected <stream>:<tag>",
                ist.metadata.name
            ))
        })
}

impl ImageStore for MemoryStore {
    fn get_tag(&self, namespace: &str, name: &str) -> StoreResult<ImageStreamTag> {
        self.enter(StoreOp::GetTag)?;
        lock(&self.state)
            .tags
            .get(&stream_key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "imagestreamtag".to_string(),
                name: stream_key(namespace, name),
            })
    }

    fn create_tag(&self, ist: &ImageStreamTag) -> StoreResult<ImageStreamTag> {
        self.enter(StoreOp::CreateTag)?;
        let (stream, tag) = validate_name(ist)?;
        let key = stream_key(&ist.metadata.namespace, &ist.metadata.name);

        let mut state = lock(&self.state);
        if state.tags.contains_key(&key) {
            return Err(StoreError::AlreadyExists { name: key });
        }
        let digest = resolve_image(ist)?;

        let mut stored = ist.clone();
        stored.metadata.resource_version = next_version(&mut state);
        stored.metadata.creation_timestamp = Some(Utc::now());
        stored.image = Image {
            name: digest.clone(),
        };
        state.tags.insert(key, stored.clone());
        record_status_tag(&mut state, &ist.metadata.namespace, &stream, &tag, &digest);
        Ok(stored)
    }

    fn update_tag(&self, ist: &ImageStreamTag) -> StoreResult<ImageStreamTag> {
        self.enter(StoreOp::UpdateTag)?;
        let (stream, tag) = validate_name(ist)?;
        let key = stream_key(&ist.metadata.namespace, &ist.metadata.name);

        if self.take_conflict() {
            return Err(StoreError::Conflict { name: key });
        }

        let mut state = lock(&self.state);
        let existing = state
            .tags
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "imagestreamtag".to_string(),
                name: key.clone(),
            })?;
        if existing.metadata.resource_version != ist.metadata.resource_version {
            return Err(StoreError::Conflict { name: key });
        }
        let digest = resolve_image(ist)?;

        let mut stored = ist.clone();
        stored.metadata.resource_version = next_version(&mut state);
        stored.metadata.creation_timestamp = existing.metadata.creation_timestamp;
        stored.image = Image {
            name: digest.clone(),
        };
        state.tags.insert(key, stored.clone());
        record_status_tag(&mut state, &ist.metadata.namespace, &stream, &tag, &digest);
        Ok(stored)
    }

    fn get_stream(&self, namespace: &str, name: &str) -> StoreResult<ImageStream> {
        self.enter(StoreOp::GetStream)?;
        lock(&self.state)
            .streams
            .get(&stream_key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "imagestream".to_string(),
                name: stream_key(namespace, name),
            })
    }
}
