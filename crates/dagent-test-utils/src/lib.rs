//! Testing utilities for the dagent workspace
//!
//! In-memory stand-ins for the handover's collaborators:
//! - [`FakeRuntime`]: containers, a local image store and a "registry"
//! - [`FakeIdentity`]: resolves to one container held by a `FakeRuntime`
//! - [`ManualClock`]: a clock tests move by hand

#![allow(missing_docs)]

use async_trait::async_trait;
use dagent_update::{
    Clock, ContainerDescriptor, ContainerId, ContainerRuntime, ContainerSpec, Identity, ImageId,
    MountKind, MountPoint, RestartPolicyName, RuntimeError,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Runtime operation, for call recording and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FindByName,
    Inspect,
    Rename,
    Create,
    Start,
    Remove,
    ImageExists,
    Pull,
    ImageId,
}

/// One recorded runtime call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    FindByName(String),
    Inspect(ContainerId),
    Rename { id: ContainerId, name: String },
    Create(ContainerSpec),
    Start(ContainerId),
    Remove { id: ContainerId, force: bool },
    ImageExists(String),
    Pull(String),
    ImageId(String),
}

impl RuntimeCall {
    #[must_use]
    pub fn op(&self) -> Op {
        match self {
            Self::FindByName(_) => Op::FindByName,
            Self::Inspect(_) => Op::Inspect,
            Self::Rename { .. } => Op::Rename,
            Self::Create(_) => Op::Create,
            Self::Start(_) => Op::Start,
            Self::Remove { .. } => Op::Remove,
            Self::ImageExists(_) => Op::ImageExists,
            Self::Pull(_) => Op::Pull,
            Self::ImageId(_) => Op::ImageId,
        }
    }

    /// Calls that change container state
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.op(),
            Op::Rename | Op::Create | Op::Start | Op::Remove
        )
    }
}

/// Container held by the fake runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeContainer {
    pub descriptor: ContainerDescriptor,
    /// Content id resolved when the container was created
    pub image_id: ImageId,
    pub running: bool,
}

impl FakeContainer {
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.primary_name().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    containers: BTreeMap<ContainerId, FakeContainer>,
    local_images: HashMap<String, ImageId>,
    registry: HashMap<String, ImageId>,
    calls: Vec<RuntimeCall>,
    counts: HashMap<Op, usize>,
    failures: HashMap<(Op, usize), RuntimeError>,
    gates: HashMap<Op, Arc<Gate>>,
    next_id: u64,
}

/// Holds the next call of one operation until released
#[derive(Debug, Default)]
pub struct Gate {
    entered: Notify,
    released: Notify,
}

impl Gate {
    /// Wait until the gated call has arrived
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the gated call proceed
    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.released.notified().await;
    }
}

/// In-memory container runtime
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `reference` pullable as `id`
    pub fn publish_image(&self, reference: &str, id: &str) {
        self.state
            .lock()
            .registry
            .insert(reference.to_string(), ImageId::from(id));
    }

    /// Put `reference` in the local store as `id`
    pub fn add_local_image(&self, reference: &str, id: &str) {
        self.state
            .lock()
            .local_images
            .insert(reference.to_string(), ImageId::from(id));
    }

    /// Add a running container created from a local image
    ///
    /// # Panics
    /// If `descriptor.image` is not in the local store.
    pub fn add_running_container(&self, descriptor: ContainerDescriptor) -> ContainerId {
        let mut state = self.state.lock();
        let image_id = state
            .local_images
            .get(&descriptor.image)
            .cloned()
            .unwrap_or_else(|| panic!("image {} not local", descriptor.image));
        let id = descriptor.id.clone();
        state.containers.insert(
            id.clone(),
            FakeContainer {
                descriptor,
                image_id,
                running: true,
            },
        );
        id
    }

    /// Hold the next call of `op` until the returned gate is released
    pub fn gate(&self, op: Op) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.state.lock().gates.insert(op, gate.clone());
        gate
    }

    /// Wait at the gate for `op`, if one is set; each gate holds one call
    async fn wait_gate(&self, op: Op) {
        let gate = self.state.lock().gates.remove(&op);
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }

    /// Fail the `nth` (1-based) call of `op` with `error`
    pub fn fail_call(&self, op: Op, nth: usize, error: RuntimeError) {
        self.state.lock().failures.insert((op, nth), error);
    }

    #[must_use]
    pub fn container(&self, id: &ContainerId) -> Option<FakeContainer> {
        self.state.lock().containers.get(id).cloned()
    }

    #[must_use]
    pub fn container_named(&self, name: &str) -> Option<FakeContainer> {
        self.state
            .lock()
            .containers
            .values()
            .find(|c| c.name() == name)
            .cloned()
    }

    #[must_use]
    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().containers.values().cloned().collect()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    #[must_use]
    pub fn calls_of(&self, op: Op) -> Vec<RuntimeCall> {
        self.calls().into_iter().filter(|c| c.op() == op).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Record a call and return the injected failure for it, if any
    fn record(state: &mut FakeState, call: RuntimeCall) -> Result<(), RuntimeError> {
        let op = call.op();
        state.calls.push(call);
        let count = state.counts.entry(op).or_default();
        *count += 1;
        let nth = *count;
        match state.failures.remove(&(op, nth)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn id_by_name(state: &FakeState, name: &str) -> Option<ContainerId> {
        state
            .containers
            .values()
            .find(|c| c.name() == name)
            .map(|c| c.descriptor.id.clone())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn find_container_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ContainerId>, RuntimeError> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::FindByName(name.to_string()))?;
        Ok(Self::id_by_name(&state, name))
    }

    async fn inspect_container(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerDescriptor, RuntimeError> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::Inspect(id.clone()))?;
        state
            .containers
            .get(id)
            .map(|c| c.descriptor.clone())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn rename_container(&self, id: &ContainerId, new_name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        Self::record(
            &mut state,
            RuntimeCall::Rename {
                id: id.clone(),
                name: new_name.to_string(),
            },
        )?;
        if let Some(holder) = Self::id_by_name(&state, new_name) {
            if &holder != id {
                return Err(RuntimeError::Conflict(new_name.to_string()));
            }
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.descriptor.names = vec![format!("/{new_name}")];
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError> {
        self.wait_gate(Op::Create).await;
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::Create(spec.clone()))?;
        if Self::id_by_name(&state, &spec.name).is_some() {
            return Err(RuntimeError::Conflict(spec.name.clone()));
        }
        let image_id = state
            .local_images
            .get(&spec.image)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(spec.image.clone()))?;

        state.next_id += 1;
        let id = ContainerId(format!("fake{:04}", state.next_id));
        let descriptor =
            ContainerDescriptor::new(id.clone(), format!("/{}", spec.name), spec.image.clone())
                .with_env(spec.env.clone())
                .with_mounts(spec.mounts.clone())
                .with_restart_policy(spec.restart_policy);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                descriptor,
                image_id,
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::Start(id.clone()))?;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        Self::record(
            &mut state,
            RuntimeCall::Remove {
                id: id.clone(),
                force,
            },
        )?;
        let running = state.containers.get(id).map(|c| c.running);
        match running {
            None => Err(RuntimeError::NotFound(id.to_string())),
            Some(true) if !force => Err(RuntimeError::Conflict(format!("{id} is running"))),
            Some(_) => {
                state.containers.remove(id);
                Ok(())
            }
        }
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::ImageExists(reference.to_string()))?;
        Ok(state.local_images.contains_key(reference))
    }

    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::Pull(reference.to_string()))?;
        let id = state
            .registry
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("manifest for {reference}")))?;
        state.local_images.insert(reference.to_string(), id);
        Ok(())
    }

    async fn image_id(&self, reference: &str) -> Result<ImageId, RuntimeError> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::ImageId(reference.to_string()))?;
        state
            .local_images
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(reference.to_string()))
    }
}

/// Identity resolving to one container of a [`FakeRuntime`]
///
/// Lookups read the runtime's state directly and are not recorded as
/// runtime calls.
#[derive(Debug)]
pub struct FakeIdentity {
    runtime: Arc<FakeRuntime>,
    own_id: Mutex<Option<ContainerId>>,
}

impl FakeIdentity {
    #[must_use]
    pub fn new(runtime: Arc<FakeRuntime>, own_id: ContainerId) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            own_id: Mutex::new(Some(own_id)),
        })
    }

    /// Make `own_container_id` report nothing
    pub fn forget_id(&self) {
        *self.own_id.lock() = None;
    }

    fn own(&self) -> Result<FakeContainer, RuntimeError> {
        let id = self
            .own_id
            .lock()
            .clone()
            .ok_or_else(|| RuntimeError::NotFound("own container id".to_string()))?;
        self.runtime
            .container(&id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl Identity for FakeIdentity {
    async fn own_container(&self) -> Result<ContainerDescriptor, RuntimeError> {
        self.own().map(|c| c.descriptor)
    }

    async fn own_image(&self) -> Result<ImageId, RuntimeError> {
        self.own().map(|c| c.image_id)
    }

    fn own_container_id(&self) -> Option<ContainerId> {
        self.own_id.lock().clone()
    }
}

/// Clock moved by hand
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn at(now: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(now),
        })
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Runtime with `agent` running `registry/agent:v1` and `v2` published
pub struct Scenario {
    pub runtime: Arc<FakeRuntime>,
    pub identity: Arc<FakeIdentity>,
    pub clock: Arc<ManualClock>,
    pub own_id: ContainerId,
}

/// Start time of every [`Scenario`] clock
pub const SCENARIO_START: i64 = 1_700_000_000;

#[must_use]
pub fn agent_scenario() -> Scenario {
    let runtime = FakeRuntime::new();
    runtime.add_local_image("registry/agent:v1", "sha256:v1");
    runtime.publish_image("registry/agent:v2", "sha256:v2");

    let descriptor = ContainerDescriptor::new("agent0001", "/agent", "registry/agent:v1")
        .with_env(vec![
            "GRPC_TOKEN=secret".to_string(),
            "DATA_MOUNT_PATH=/srv/dagent".to_string(),
        ])
        .with_mounts(vec![
            MountPoint::new(MountKind::Bind, "/var/run/docker.sock", "/var/run/docker.sock"),
            MountPoint::new(MountKind::Volume, "dagent-data", "/srv/dagent"),
        ])
        .with_restart_policy(RestartPolicyName::UnlessStopped);
    let own_id = runtime.add_running_container(descriptor);

    Scenario {
        identity: FakeIdentity::new(runtime.clone(), own_id.clone()),
        runtime,
        clock: ManualClock::at(SCENARIO_START),
        own_id,
    }
}
