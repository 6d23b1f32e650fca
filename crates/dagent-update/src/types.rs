//! Core types for the handover
//!
//! Defines the transient copies of runtime state the core works with:
//! - Container and image identifiers
//! - Container descriptors obtained by inspection
//! - Mount points and restart policies
//! - The creation spec for a replacement container

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque runtime container identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    /// Borrow the raw id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ContainerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image content identifier (e.g. `sha256:...`)
///
/// Two references name the same image only if their ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(pub String);

impl ImageId {
    /// Borrow the raw id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ImageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ImageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mount type in its runtime-neutral form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Host path bind
    Bind,
    /// Named volume
    Volume,
    /// In-memory filesystem
    Tmpfs,
    /// Windows named pipe
    Npipe,
    /// Cluster volume
    Cluster,
}

impl MountKind {
    /// Runtime spelling of the kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Volume => "volume",
            Self::Tmpfs => "tmpfs",
            Self::Npipe => "npipe",
            Self::Cluster => "cluster",
        }
    }
}

impl FromStr for MountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bind" => Ok(Self::Bind),
            "volume" => Ok(Self::Volume),
            "tmpfs" => Ok(Self::Tmpfs),
            "npipe" => Ok(Self::Npipe),
            "cluster" => Ok(Self::Cluster),
            other => Err(format!("unknown mount type: {other}")),
        }
    }
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mount carried from the old container to the new one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Mount type
    pub kind: MountKind,
    /// Host path or volume name
    pub source: String,
    /// Path inside the container
    pub target: String,
}

impl MountPoint {
    /// Create new mount point
    #[inline]
    pub fn new(kind: MountKind, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Restart policy name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyName {
    /// Never restart
    #[default]
    No,
    /// Always restart
    Always,
    /// Restart unless explicitly stopped
    UnlessStopped,
    /// Restart on non-zero exit
    OnFailure,
}

impl RestartPolicyName {
    /// Runtime spelling of the policy
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
            Self::OnFailure => "on-failure",
        }
    }
}

impl FromStr for RestartPolicyName {
    type Err = String;

    /// An empty name is the runtime's way of saying `no`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "no" => Ok(Self::No),
            "always" => Ok(Self::Always),
            "unless-stopped" => Ok(Self::UnlessStopped),
            "on-failure" => Ok(Self::OnFailure),
            other => Err(format!("unknown restart policy: {other}")),
        }
    }
}

/// Inspected state of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    /// Runtime id
    pub id: ContainerId,
    /// Names as reported by the runtime (may carry a leading `/`)
    pub names: Vec<String>,
    /// Image reference the container was created from
    pub image: String,
    /// Mounts, in runtime order
    pub mounts: Vec<MountPoint>,
    /// `KEY=value` environment entries, in runtime order
    pub env: Vec<String>,
    /// Restart policy
    pub restart_policy: RestartPolicyName,
}

impl ContainerDescriptor {
    /// Create a descriptor with a single name and no mounts or env
    pub fn new(
        id: impl Into<ContainerId>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            names: vec![name.into()],
            image: image.into(),
            mounts: Vec::new(),
            env: Vec::new(),
            restart_policy: RestartPolicyName::default(),
        }
    }

    /// First name without the runtime's leading `/`
    #[must_use]
    pub fn primary_name(&self) -> Option<&str> {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .filter(|n| !n.is_empty())
    }

    /// With mounts
    #[inline]
    #[must_use]
    pub fn with_mounts(mut self, mounts: Vec<MountPoint>) -> Self {
        self.mounts = mounts;
        self
    }

    /// With environment
    #[inline]
    #[must_use]
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// With restart policy
    #[inline]
    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicyName) -> Self {
        self.restart_policy = policy;
        self
    }
}

/// Creation request for a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image reference to run
    pub image: String,
    /// `KEY=value` environment entries
    pub env: Vec<String>,
    /// Mounts
    pub mounts: Vec<MountPoint>,
    /// Restart policy
    pub restart_policy: RestartPolicyName,
}

impl ContainerSpec {
    /// Create a bare spec
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Vec::new(),
            mounts: Vec::new(),
            restart_policy: RestartPolicyName::default(),
        }
    }

    /// Spec that reproduces `source`'s env, mounts and restart policy
    #[must_use]
    pub fn cloned_from(source: &ContainerDescriptor, name: &str, image: &str) -> Self {
        Self::new(name, image)
            .with_env(source.env.clone())
            .with_mounts(source.mounts.clone())
            .with_restart_policy(source.restart_policy)
    }

    /// With environment
    #[inline]
    #[must_use]
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// With mounts
    #[inline]
    #[must_use]
    pub fn with_mounts(mut self, mounts: Vec<MountPoint>) -> Self {
        self.mounts = mounts;
        self
    }

    /// With restart policy
    #[inline]
    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicyName) -> Self {
        self.restart_policy = policy;
        self
    }
}
