//! dagent self-update handover
//!
//! Lets an agent running in a container replace itself with a new image
//! version without an external orchestrator:
//! - Resolves the target tag and refuses updates that change nothing
//! - Renames the running container out of the way
//! - Clones it (env, mounts, restart policy) onto the new image
//! - Rolls the rename back if the clone fails
//! - Retires the old container once the handover is confirmed in time
//!
//! The container engine and the "who am I" lookup are collaborators
//! supplied by the embedding agent through [`ContainerRuntime`] and
//! [`Identity`].
//!
//! # Example
//!
//! ```rust,ignore
//! use dagent_update::{SelfUpdater, UpdateConfig};
//! use std::sync::Arc;
//!
//! # use dagent_update::{ContainerRuntime, Identity, UpdateError};
//! # async fn example(
//! #     runtime: Arc<dyn ContainerRuntime>,
//! #     identity: Arc<dyn Identity>,
//! # ) -> Result<(), UpdateError> {
//! let updater = SelfUpdater::new(runtime, identity, UpdateConfig::new())?;
//! let report = updater.self_update("v2", 300).await?;
//! println!("new container {} until {}", report.new_container, report.deadline);
//!
//! // later, when the new instance reports healthy
//! updater.finalize().await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod cloner;
pub mod config;
pub mod error;
pub mod image;
pub mod naming;
pub mod runtime;
pub mod session;
pub mod types;
pub mod updater;

// Re-exports for convenience
pub use cloner::clone_container;
pub use config::{OutstandingUpdatePolicy, UpdateConfig};
pub use error::{CloneError, RuntimeError, UpdateError, UpdateStep};
pub use image::{resolve_and_pull, ImageReference, ImageReferenceError};
pub use naming::unique_container_name;
pub use runtime::{ContainerRuntime, Identity};
pub use session::{Clock, SystemClock, UpdateSession, UpdateStatus};
pub use types::{
    ContainerDescriptor, ContainerId, ContainerSpec, ImageId, MountKind, MountPoint,
    RestartPolicyName,
};
pub use updater::{FinalizeOutcome, SelfUpdater, UpdateReport};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for embedding the updater
    pub use crate::{
        Clock, ContainerRuntime, FinalizeOutcome, Identity, SelfUpdater, UpdateConfig,
        UpdateError, UpdateReport, UpdateStatus,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
