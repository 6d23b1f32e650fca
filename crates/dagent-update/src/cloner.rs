//! Replacement container construction
//!
//! Reproduces a source container's restart policy, environment and mounts
//! under a new name and image, then starts it.

use crate::error::CloneError;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerId, ContainerSpec};

/// Create and start a copy of `source` running `new_image` as `new_name`
///
/// # Errors
/// - `CloneError::Inspect` if the source cannot be inspected
/// - `CloneError::Create` if creation fails (name collision, bad image)
/// - `CloneError::Start` if the created container does not start; that
///   container is left in place
pub async fn clone_container(
    runtime: &dyn ContainerRuntime,
    source: &ContainerId,
    new_name: &str,
    new_image: &str,
) -> Result<ContainerId, CloneError> {
    let descriptor = runtime
        .inspect_container(source)
        .await
        .map_err(CloneError::Inspect)?;

    let spec = ContainerSpec::cloned_from(&descriptor, new_name, new_image);
    tracing::debug!(
        "Creating container {} from {} ({} mounts, {} env, restart {})",
        spec.name,
        spec.image,
        spec.mounts.len(),
        spec.env.len(),
        spec.restart_policy.as_str()
    );

    let container_id = runtime
        .create_container(&spec)
        .await
        .map_err(CloneError::Create)?;

    if let Err(source) = runtime.start_container(&container_id).await {
        tracing::error!(
            "Container {} created but not started, left for operator: {}",
            container_id,
            source
        );
        return Err(CloneError::Start {
            container_id,
            source,
        });
    }

    tracing::debug!("Started container {}", container_id);
    Ok(container_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::runtime::MockContainerRuntime;
    use crate::types::{ContainerDescriptor, MountKind, MountPoint, RestartPolicyName};
    use mockall::Sequence;
    use pretty_assertions::assert_eq;

    fn source() -> ContainerDescriptor {
        ContainerDescriptor::new("old", "/agent", "registry/agent:v1")
            .with_env(vec!["GRPC_TOKEN=abc".to_string(), "NAME=agent".to_string()])
            .with_mounts(vec![
                MountPoint::new(MountKind::Bind, "/var/run/docker.sock", "/var/run/docker.sock"),
                MountPoint::new(MountKind::Volume, "agent-data", "/srv/dagent"),
            ])
            .with_restart_policy(RestartPolicyName::UnlessStopped)
    }

    #[tokio::test]
    async fn clone_carries_settings_and_starts() {
        let mut runtime = MockContainerRuntime::new();
        let mut seq = Sequence::new();

        runtime
            .expect_inspect_container()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(source()));
        runtime
            .expect_create_container()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|spec: &ContainerSpec| {
                let expected = source();
                spec.name == "agent"
                    && spec.image == "registry/agent:v2"
                    && spec.env == expected.env
                    && spec.mounts == expected.mounts
                    && spec.restart_policy == RestartPolicyName::UnlessStopped
            })
            .returning(|_| Ok(ContainerId::from("new")));
        runtime
            .expect_start_container()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let id = clone_container(&runtime, &ContainerId::from("old"), "agent", "registry/agent:v2")
            .await
            .unwrap();
        assert_eq!(id, ContainerId::from("new"));
    }

    #[tokio::test]
    async fn create_failure_skips_start() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_inspect_container().returning(|_| Ok(source()));
        runtime
            .expect_create_container()
            .returning(|_| Err(RuntimeError::Conflict("agent".to_string())));
        runtime.expect_start_container().never();

        let err = clone_container(&runtime, &ContainerId::from("old"), "agent", "img:v2")
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::Create(RuntimeError::Conflict(_))));
        assert!(!err.requires_operator());
    }

    #[tokio::test]
    async fn start_failure_reports_leftover() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_inspect_container().returning(|_| Ok(source()));
        runtime
            .expect_create_container()
            .returning(|_| Ok(ContainerId::from("half")));
        runtime
            .expect_start_container()
            .returning(|_| Err(RuntimeError::Request("port in use".to_string())));
        runtime.expect_remove_container().never();

        let err = clone_container(&runtime, &ContainerId::from("old"), "agent", "img:v2")
            .await
            .unwrap_err();
        assert!(err.requires_operator());
        assert_eq!(err.stranded_container(), Some(&ContainerId::from("half")));
    }

    #[tokio::test]
    async fn inspect_failure_creates_nothing() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_inspect_container()
            .returning(|_| Err(RuntimeError::NotFound("old".to_string())));
        runtime.expect_create_container().never();

        let err = clone_container(&runtime, &ContainerId::from("old"), "agent", "img:v2")
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::Inspect(_)));
    }
}
