//! Image references and resolution
//!
//! - [`ImageReference`] decomposes `host/name:tag@digest` so a candidate
//!   reference for a new tag can be built from the running one.
//! - [`resolve_and_pull`] makes an image local and returns its content id.

use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;
use crate::types::ImageId;
use std::fmt;
use std::str::FromStr;

/// Maximum tag length accepted by registries
pub const MAX_TAG_LEN: usize = 128;

/// Image reference parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageReferenceError {
    /// Empty input
    #[error("empty image reference")]
    Empty,

    /// No repository name after removing host, tag and digest
    #[error("missing repository name in {0:?}")]
    MissingName(String),
}

/// Decomposed image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host (with optional port)
    pub host: Option<String>,
    /// Repository path
    pub name: String,
    /// Tag
    pub tag: Option<String>,
    /// Content digest pin
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference
    ///
    /// The first path component is a host when it contains `.` or `:` or
    /// is `localhost`. A `:` only introduces a tag after the last `/`.
    ///
    /// # Errors
    /// Returns `ImageReferenceError` for empty input or a missing name.
    pub fn parse(reference: &str) -> Result<Self, ImageReferenceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageReferenceError::Empty);
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (reference, None),
        };

        let last_slash = rest.rfind('/');
        let (path, tag) = match rest.rfind(':') {
            Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
                (&rest[..colon], Some(rest[colon + 1..].to_string()))
            }
            _ => (rest, None),
        };

        let (host, name) = match path.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), remainder)
            }
            _ => (None, path),
        };

        if name.is_empty() {
            return Err(ImageReferenceError::MissingName(reference.to_string()));
        }

        Ok(Self {
            host,
            name: name.to_string(),
            tag: tag.filter(|t| !t.is_empty()),
            digest,
        })
    }

    /// Same repository under another tag, digest dropped
    #[must_use]
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            host: self.host.clone(),
            name: self.name.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    /// `host/name`, or just `name` without a host
    #[must_use]
    pub fn repository(&self) -> String {
        match &self.host {
            Some(host) => format!("{host}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl FromStr for ImageReference {
    type Err = ImageReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repository())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Check a tag against the registry tag grammar
#[must_use]
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && !tag.starts_with(['.', '-'])
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Ensure `reference` is present locally and return its content id
///
/// Pulls with default credentials when the image is absent.
///
/// # Errors
/// Propagates the runtime error of the existence check, the pull or the
/// final lookup (e.g. the tag was deleted between pull and lookup).
pub async fn resolve_and_pull(
    runtime: &dyn ContainerRuntime,
    reference: &str,
) -> Result<ImageId, RuntimeError> {
    if runtime.image_exists(reference).await? {
        tracing::debug!("Image {} present locally", reference);
    } else {
        tracing::info!("Pulling image {}", reference);
        runtime.pull_image(reference).await?;
    }

    runtime.image_id(reference).await
}
