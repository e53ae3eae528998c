//! Image stream resource model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image stream that holds images built during a run.
pub const PIPELINE_IMAGE_STREAM: &str = "pipeline";

/// Image stream that release images and promoted outputs are tagged into.
pub const STABLE_IMAGE_STREAM: &str = "stable";

/// Reference kind pointing at an image by digest within a stream.
pub const IMAGE_STREAM_IMAGE_KIND: &str = "ImageStreamImage";

/// Object metadata shared by every stored resource.
///
/// `resource_version` is the optimistic concurrency token and
/// `creation_timestamp` is written by the store; neither is owned by steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }
}

/// Reference to another object in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// How consumers pull the image a tag points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagReferencePolicyType {
    /// Pull from the original source registry.
    #[default]
    Source,
    /// Pull through the local registry.
    Local,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagReferencePolicy {
    #[serde(rename = "type")]
    pub kind: TagReferencePolicyType,
}

/// Desired state of an image stream tag: what it should point at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ObjectReference>,
    #[serde(default)]
    pub reference_policy: TagReferencePolicy,
}

impl TagReference {
    /// Tag reference pointing at `stream@digest` in `namespace`, pulled locally.
    pub fn image_stream_image(namespace: &str, stream: &str, digest: &str) -> Self {
        Self {
            from: Some(ObjectReference {
                kind: IMAGE_STREAM_IMAGE_KIND.to_string(),
                name: format!("{}@{}", stream, digest),
                namespace: namespace.to_string(),
            }),
            reference_policy: TagReferencePolicy {
                kind: TagReferencePolicyType::Local,
            },
        }
    }
}

/// Image a tag currently resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub name: String,
}

/// A named tag within an image stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStreamTag {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagReference>,
    #[serde(default)]
    pub image: Image,
}

impl ImageStreamTag {
    /// `namespace/stream:tag`, used in logs and error targets.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }
}

/// Resolved tag entry in an image stream's status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTag {
    pub tag: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_image_repository: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_docker_image_repository: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<StatusTag>,
}

/// A stream of tagged images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStream {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: ImageStreamStatus,
}

impl ImageStream {
    /// Repository address consumers should pull from.
    ///
    /// Prefers the externally reachable repository and falls back to the
    /// cluster-internal one; `None` when neither is populated.
    pub fn registry(&self) -> Option<&str> {
        [
            &self.status.public_docker_image_repository,
            &self.status.docker_image_repository,
        ]
        .into_iter()
        .find(|r| !r.is_empty())
        .map(String::as_str)
    }
}

/// Split `stream:tag` into its parts.
pub fn split_tag_name(name: &str) -> Option<(&str, &str)> {
    let (stream, tag) = name.split_once(':')?;
    if stream.is_empty() || tag.is_empty() {
        return None;
    }
    Some((stream, tag))
}
