//! Collaborator seams
//!
//! The handover never talks to a container engine directly. The embedding
//! agent supplies a [`ContainerRuntime`] and an [`Identity`]; the core only
//! sequences their calls.

use crate::error::RuntimeError;
use crate::types::{ContainerDescriptor, ContainerId, ContainerSpec, ImageId};

/// Container engine primitives used by the handover
///
/// Every call blocks (asynchronously) until the engine answers. The core
/// neither retries nor cancels them.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Exact-name lookup; `None` if no container has that name
    async fn find_container_by_name(&self, name: &str) -> Result<Option<ContainerId>, RuntimeError>;

    /// Inspect a container
    async fn inspect_container(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerDescriptor, RuntimeError>;

    /// Rename a container
    async fn rename_container(&self, id: &ContainerId, new_name: &str) -> Result<(), RuntimeError>;

    /// Create (but do not start) a container
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError>;

    /// Start a created container
    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    /// Remove a container, killing it first when `force` is set
    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), RuntimeError>;

    /// Check whether an image reference is present locally
    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError>;

    /// Pull an image with default registry credentials
    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError>;

    /// Resolve a local image reference to its content id
    async fn image_id(&self, reference: &str) -> Result<ImageId, RuntimeError>;
}

/// "Which container am I" lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Identity: Send + Sync {
    /// Descriptor of the container this process runs in
    async fn own_container(&self) -> Result<ContainerDescriptor, RuntimeError>;

    /// Content id of the image this process runs
    async fn own_image(&self) -> Result<ImageId, RuntimeError>;

    /// Id of the container this process runs in, if it can be determined
    fn own_container_id(&self) -> Option<ContainerId>;
}
