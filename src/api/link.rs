//! Step links.

use std::fmt;

/// Identity of something a step makes available or depends on.
///
/// The runner forms an edge from step A to step B exactly when a link in
/// A's creates set is equal to a link in B's requires set, so equality here
/// is the whole dependency model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepLink {
    /// A tag in the run's pipeline image stream.
    InternalImage(String),
    /// A tag in an arbitrary image stream.
    ExternalImage {
        namespace: String,
        name: String,
        tag: String,
    },
    /// The release payload has been imported into the stable stream.
    ReleaseImages,
}

impl StepLink {
    pub fn internal_image(tag: impl Into<String>) -> Self {
        StepLink::InternalImage(tag.into())
    }

    pub fn external_image(
        namespace: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        StepLink::ExternalImage {
            namespace: namespace.into(),
            name: name.into(),
            tag: tag.into(),
        }
    }

    pub fn release_images() -> Self {
        StepLink::ReleaseImages
    }
}

impl fmt::Display for StepLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepLink::InternalImage(tag) => write!(f, "internal image pipeline:{}", tag),
            StepLink::ExternalImage {
                namespace,
                name,
                tag,
            } if namespace.is_empty() => write!(f, "external image {}:{}", name, tag),
            StepLink::ExternalImage {
                namespace,
                name,
                tag,
            } => write!(f, "external image {}/{}:{}", namespace, name, tag),
            StepLink::ReleaseImages => write!(f, "release images"),
        }
    }
}
