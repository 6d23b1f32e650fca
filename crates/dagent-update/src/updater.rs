//! Self-update orchestrator and finalization gate
//!
//! The running ("old") instance:
//! 1. Resolves the target tag to an image and refuses no-op updates
//! 2. Renames itself out of the way
//! 3. Clones itself onto the target image under its original name
//! 4. Arms a confirmation deadline
//!
//! Once the embedding agent learns that the new instance is healthy, it
//! calls [`SelfUpdater::finalize`], which removes the old container while
//! the deadline holds and otherwise abandons the handover, leaving the old
//! container running.

use crate::cloner::clone_container;
use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateStep};
use crate::image::{is_valid_tag, resolve_and_pull, ImageReference};
use crate::naming::unique_container_name;
use crate::runtime::{ContainerRuntime, Identity};
use crate::session::{Clock, FinalizeDecision, SystemClock, UpdateSession, UpdateStatus};
use crate::types::{ContainerId, ImageId};
use std::sync::Arc;

/// Successful handover, pending confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// The old container, still running
    pub old_container: ContainerId,
    /// Temporary name the old container now carries
    pub old_name: String,
    /// The new container, running under the original name
    pub new_container: ContainerId,
    /// Original name, now held by the new container
    pub name: String,
    /// Candidate reference the new container runs
    pub image_reference: String,
    /// Content id of that reference
    pub image: ImageId,
    /// Unix deadline for confirmation
    pub deadline: i64,
}

/// Result of a finalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Nothing was armed
    Noop,
    /// Confirmation came in time; the old container was removed
    Removed {
        /// The removed container
        container_id: ContainerId,
    },
    /// Confirmation came too late; the old container was left running
    Abandoned {
        /// The deadline that passed
        deadline: i64,
    },
}

/// Drives the handover for the container this process runs in
pub struct SelfUpdater {
    runtime: Arc<dyn ContainerRuntime>,
    identity: Arc<dyn Identity>,
    session: UpdateSession,
    config: UpdateConfig,
}

impl std::fmt::Debug for SelfUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfUpdater")
            .field("session", &self.session)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SelfUpdater {
    /// Create an updater on the system clock
    ///
    /// # Errors
    /// `UpdateError::Config` if `config` does not validate.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        identity: Arc<dyn Identity>,
        config: UpdateConfig,
    ) -> Result<Self, UpdateError> {
        Self::with_clock(runtime, identity, config, Arc::new(SystemClock))
    }

    /// Create an updater on a custom clock
    ///
    /// # Errors
    /// `UpdateError::Config` if `config` does not validate.
    pub fn with_clock(
        runtime: Arc<dyn ContainerRuntime>,
        identity: Arc<dyn Identity>,
        config: UpdateConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, UpdateError> {
        config.validate()?;
        Ok(Self {
            runtime,
            identity,
            session: UpdateSession::new(config.outstanding_policy, clock),
            config,
        })
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Snapshot of the handover session
    #[inline]
    #[must_use]
    pub fn status(&self) -> UpdateStatus {
        self.session.status()
    }

    /// Armed deadline, if any
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<i64> {
        self.session.deadline()
    }

    /// [`self_update`](Self::self_update) with the configured timeout
    ///
    /// # Errors
    /// See [`self_update`](Self::self_update).
    pub async fn self_update_with_default_timeout(
        &self,
        tag: &str,
    ) -> Result<UpdateReport, UpdateError> {
        self.self_update(tag, self.config.default_timeout_secs).await
    }

    /// Replace this container with one running `tag` of the same repository
    ///
    /// On success both containers run: the old one under a temporary name,
    /// the new one under the original name, and a deadline of
    /// `now + timeout_secs` is armed for [`finalize`](Self::finalize).
    ///
    /// # Errors
    /// - `AlreadyInProgress` if the outstanding-update guard refuses
    /// - `InvalidTag`, `Identity`, `InvalidImageReference`,
    ///   `ImageResolution` before any container is touched
    /// - `ImageUnchanged` if `tag` resolves to the running image
    /// - `Step` if probing names or renaming fails
    /// - `CloneFailed` after a successful rollback rename
    /// - `RollbackFailed` if the rollback rename fails too; the old
    ///   container keeps its temporary name
    pub async fn self_update(
        &self,
        tag: &str,
        timeout_secs: u32,
    ) -> Result<UpdateReport, UpdateError> {
        let ticket = self.session.begin_update()?;
        tracing::info!("Self-update to tag {} requested", tag);

        if !is_valid_tag(tag) {
            return Err(UpdateError::InvalidTag(tag.to_string()));
        }

        let container = self
            .identity
            .own_container()
            .await
            .map_err(|e| UpdateError::Identity(e.to_string()))?;
        let original_name = container
            .primary_name()
            .ok_or_else(|| {
                UpdateError::Identity(format!("container {} has no name", container.id))
            })?
            .to_string();
        let running_image = self
            .identity
            .own_image()
            .await
            .map_err(|e| UpdateError::Identity(e.to_string()))?;

        let candidate = ImageReference::parse(&container.image)?
            .with_tag(tag)
            .to_string();
        let target_image = resolve_and_pull(self.runtime.as_ref(), &candidate)
            .await
            .map_err(|source| UpdateError::ImageResolution {
                reference: candidate.clone(),
                source,
            })?;

        if target_image == running_image {
            tracing::info!("Tag {} resolves to running image {}", tag, running_image);
            return Err(UpdateError::ImageUnchanged {
                image: target_image,
            });
        }

        let temporary_name = unique_container_name(
            self.runtime.as_ref(),
            &format!("{original_name}{}", self.config.rename_suffix),
        )
        .await
        .map_err(|e| UpdateError::step(UpdateStep::NameLookup, e))?;

        tracing::debug!("Renaming container {} to {}", original_name, temporary_name);
        self.runtime
            .rename_container(&container.id, &temporary_name)
            .await
            .map_err(|e| UpdateError::step(UpdateStep::Rename, e))?;

        let new_container =
            match clone_container(self.runtime.as_ref(), &container.id, &original_name, &candidate)
                .await
            {
                Ok(id) => id,
                Err(clone_err) => {
                    return Err(self
                        .roll_back(&container.id, &original_name, &temporary_name, clone_err.into())
                        .await)
                }
            };

        let deadline = ticket.arm(timeout_secs);
        tracing::info!(
            "Created container {} running {}, old container {} awaits confirmation until {}",
            new_container,
            candidate,
            temporary_name,
            deadline
        );

        Ok(UpdateReport {
            old_container: container.id,
            old_name: temporary_name,
            new_container,
            name: original_name,
            image_reference: candidate,
            image: target_image,
            deadline,
        })
    }

    /// Rename the old container back after a failed clone
    async fn roll_back(
        &self,
        old: &ContainerId,
        original_name: &str,
        temporary_name: &str,
        error: UpdateError,
    ) -> UpdateError {
        tracing::warn!("Clone failed, restoring name {}: {}", original_name, error);

        match self.runtime.rename_container(old, original_name).await {
            Ok(()) => error,
            Err(rollback) => {
                tracing::error!(
                    "Rollback failed, container {} left as {}: {}",
                    old,
                    temporary_name,
                    rollback
                );
                UpdateError::RollbackFailed {
                    original: Box::new(error),
                    rollback,
                    stranded_name: temporary_name.to_string(),
                }
            }
        }
    }

    /// Retire the old container once the new one is confirmed
    ///
    /// Call this from the old instance when the confirmation event arrives.
    ///
    /// # Errors
    /// - `FinalizeDeferred` if a deadline is armed while another
    ///   `self_update` holds the session; retry once it returns
    /// - `OwnIdUnavailable` if the own container id cannot be determined
    /// - `Step` with `UpdateStep::Remove` if removal fails
    ///
    /// In every case the deadline stays armed.
    pub async fn finalize(&self) -> Result<FinalizeOutcome, UpdateError> {
        let ticket = match self.session.begin_finalize() {
            FinalizeDecision::Noop => return Ok(FinalizeOutcome::Noop),
            FinalizeDecision::Busy { deadline } => {
                tracing::debug!("Update in flight, deferring finalization for {}", deadline);
                return Err(UpdateError::FinalizeDeferred { deadline });
            }
            FinalizeDecision::Expired { deadline } => {
                tracing::warn!("Update timed out at {}, keeping current container", deadline);
                return Ok(FinalizeOutcome::Abandoned { deadline });
            }
            FinalizeDecision::InTime(ticket) => ticket,
        };

        tracing::debug!("Update finished, shutting down");

        let container_id = self
            .identity
            .own_container_id()
            .ok_or(UpdateError::OwnIdUnavailable)?;

        self.runtime
            .remove_container(&container_id, true)
            .await
            .map_err(|e| UpdateError::step(UpdateStep::Remove, e))?;

        ticket.complete();
        tracing::info!("Removed superseded container {}", container_id);
        Ok(FinalizeOutcome::Removed { container_id })
    }
}
