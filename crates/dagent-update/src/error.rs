//! Error types for the self-update handover
//!
//! Provides error handling for:
//! - Container runtime collaborator failures
//! - Clone (create/start) failures
//! - Update preconditions and rollback
//! - Finalization identity failures

use crate::image::ImageReferenceError;
use crate::types::{ContainerId, ImageId};
use std::fmt;

/// Failure reported by a container runtime or identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Container or image does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Name or resource already taken
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other request failure
    #[error("request failed: {0}")]
    Request(String),
}

/// Container clone errors
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    /// Source container could not be inspected
    #[error("inspecting source container failed: {0}")]
    Inspect(#[source] RuntimeError),

    /// Replacement container could not be created
    #[error("creating container failed: {0}")]
    Create(#[source] RuntimeError),

    /// Replacement was created but did not start; it is left behind
    #[error("starting container {container_id} failed: {source}")]
    Start {
        /// The created, unstarted container
        container_id: ContainerId,
        /// Underlying runtime failure
        source: RuntimeError,
    },
}

impl CloneError {
    /// A created-but-unstarted container exists and needs an operator
    #[inline]
    #[must_use]
    pub fn requires_operator(&self) -> bool {
        matches!(self, Self::Start { .. })
    }

    /// Id of the container left behind, if any
    #[must_use]
    pub fn stranded_container(&self) -> Option<&ContainerId> {
        match self {
            Self::Start { container_id, .. } => Some(container_id),
            _ => None,
        }
    }
}

/// Runtime step that failed during an update or finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    /// Probing names for the old container
    NameLookup,
    /// Renaming the old container out of the way
    Rename,
    /// Forced removal of the superseded container
    Remove,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Self::NameLookup => "name lookup",
            Self::Rename => "rename",
            Self::Remove => "remove",
        };
        f.write_str(step)
    }
}

/// Main self-update error type
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Another update is outstanding
    #[error("update already in progress")]
    AlreadyInProgress,

    /// Target tag resolves to the image already running
    #[error("update does not change image")]
    ImageUnchanged {
        /// Content id shared by both references
        image: ImageId,
    },

    /// Own container or image could not be identified
    #[error("cannot identify own container: {0}")]
    Identity(String),

    /// Target tag is not a valid image tag
    #[error("invalid image tag: {0:?}")]
    InvalidTag(String),

    /// Own image reference could not be decomposed
    #[error("invalid image reference: {0}")]
    InvalidImageReference(#[from] ImageReferenceError),

    /// Target image could not be pulled or resolved
    #[error("cannot resolve image {reference}: {source}")]
    ImageResolution {
        /// Candidate reference
        reference: String,
        /// Underlying runtime failure
        source: RuntimeError,
    },

    /// A runtime call failed
    #[error("{step} failed: {source}")]
    Step {
        /// Step that failed
        step: UpdateStep,
        /// Underlying runtime failure
        source: RuntimeError,
    },

    /// Replacement container could not be cloned
    #[error(transparent)]
    CloneFailed(#[from] CloneError),

    /// Clone failed and renaming the old container back failed too
    #[error("{original} ({rollback})")]
    RollbackFailed {
        /// Failure that triggered the rollback
        original: Box<UpdateError>,
        /// Failure of the rollback rename
        rollback: RuntimeError,
        /// Temporary name the old container is left under
        stranded_name: String,
    },

    /// Finalization arrived while an update re-trigger holds the session
    #[error("update in flight, retry finalization before {deadline}")]
    FinalizeDeferred {
        /// Pending deadline the confirmation is for
        deadline: i64,
    },

    /// Own container id unavailable during finalization
    #[error("unable to get own container ID")]
    OwnIdUnavailable,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl UpdateError {
    /// Wrap a runtime failure of `step`
    #[inline]
    pub fn step(step: UpdateStep, source: RuntimeError) -> Self {
        Self::Step { step, source }
    }

    /// Check if the call was refused before touching any container
    #[inline]
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInProgress | Self::ImageUnchanged { .. } | Self::InvalidTag(_)
        )
    }

    /// Check if the same call may succeed once the session is free
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FinalizeDeferred { .. })
    }

    /// Check if the failure left a degraded state behind
    ///
    /// True for a stranded rename and for a created-but-unstarted
    /// replacement. Neither is repaired automatically.
    #[must_use]
    pub fn requires_operator(&self) -> bool {
        match self {
            Self::RollbackFailed { .. } => true,
            Self::CloneFailed(e) => e.requires_operator(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_error_display() {
        assert_eq!(
            UpdateError::AlreadyInProgress.to_string(),
            "update already in progress"
        );
        let err = UpdateError::ImageUnchanged {
            image: ImageId::from("sha256:aa"),
        };
        assert_eq!(err.to_string(), "update does not change image");
    }

    #[test]
    fn rollback_failed_carries_both_messages() {
        let original = UpdateError::CloneFailed(CloneError::Create(RuntimeError::Conflict(
            "name agent in use".to_string(),
        )));
        let err = UpdateError::RollbackFailed {
            original: Box::new(original),
            rollback: RuntimeError::Request("daemon gone".to_string()),
            stranded_name: "agent-update".to_string(),
        };

        let text = err.to_string();
        assert!(text.contains("name agent in use"));
        assert!(text.contains("daemon gone"));
        assert!(err.requires_operator());
    }

    #[test]
    fn start_failure_requires_operator() {
        let err = UpdateError::CloneFailed(CloneError::Start {
            container_id: ContainerId::from("c9"),
            source: RuntimeError::Request("oci runtime".to_string()),
        });
        assert!(err.requires_operator());
        assert!(!err.is_precondition());

        let create = UpdateError::CloneFailed(CloneError::Create(RuntimeError::NotFound(
            "image".to_string(),
        )));
        assert!(!create.requires_operator());
    }

    #[test]
    fn deferred_finalize_is_retryable() {
        let err = UpdateError::FinalizeDeferred { deadline: 1_300 };
        assert!(err.is_retryable());
        assert!(!err.requires_operator());
        assert!(!UpdateError::AlreadyInProgress.is_retryable());
        assert_eq!(
            err.to_string(),
            "update in flight, retry finalization before 1300"
        );
    }

    #[test]
    fn preconditions_classified() {
        assert!(UpdateError::AlreadyInProgress.is_precondition());
        assert!(UpdateError::InvalidTag(String::new()).is_precondition());
        assert!(!UpdateError::OwnIdUnavailable.is_precondition());
        assert_eq!(
            UpdateError::step(UpdateStep::Rename, RuntimeError::Request("x".into())).to_string(),
            "rename failed: request failed: x"
        );
    }
}
