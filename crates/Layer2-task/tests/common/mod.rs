//! In-memory container runtime for integration tests.
//!
//! Containers and volumes only exist in memory; `exec_streaming` runs the
//! command on the host through the real Process Runner.

#![allow(dead_code)]

use async_trait::async_trait;
use berth_foundation::{BerthConfig, Error, Result};
use berth_task::{
    ContainerDetails, ContainerRuntime, ContainerSpec, EventSender, MountInfo, MountKind,
    ProcessOutput, ProcessRunner, WorkspaceService,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Heartbeat used by the fake runtime
pub const TEST_HEARTBEAT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
}

#[derive(Default)]
struct FakeState {
    volumes: BTreeMap<String, BTreeMap<String, String>>,
    containers: Vec<FakeContainer>,
}

pub struct FakeRuntime {
    runner: ProcessRunner,
    state: Mutex<FakeState>,
    fail_listing: AtomicBool,
    fail_run: AtomicBool,
    run_delay: Mutex<Duration>,
    listing_delay: Mutex<Duration>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runner: ProcessRunner::new().with_heartbeat(TEST_HEARTBEAT),
            state: Mutex::new(FakeState::default()),
            fail_listing: AtomicBool::new(false),
            fail_run: AtomicBool::new(false),
            run_delay: Mutex::new(Duration::ZERO),
            listing_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_run(&self, fail: bool) {
        self.fail_run.store(fail, Ordering::SeqCst);
    }

    /// Delay `run_container` before the container exists
    pub fn set_run_delay(&self, delay: Duration) {
        *self.run_delay.lock() = delay;
    }

    /// Delay `list_managed` after the container set was read
    pub fn set_listing_delay(&self, delay: Duration) {
        *self.listing_delay.lock() = delay;
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state.lock().volumes.keys().cloned().collect()
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().containers.clone()
    }

    /// Drop a container as if it was removed outside berth
    pub fn remove_container(&self, name: &str) {
        self.state.lock().containers.retain(|c| c.spec.name != name);
    }

    /// Add a container started by something else
    pub fn adopt(&self, spec: ContainerSpec) -> String {
        let id = container_id();
        self.state.lock().containers.push(FakeContainer {
            id: id.clone(),
            spec,
        });
        id
    }
}

fn container_id() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn details(container: &FakeContainer) -> ContainerDetails {
    let mounts = container
        .spec
        .mounts
        .iter()
        .map(|m| match m.kind {
            MountKind::Bind => MountInfo {
                kind: "bind".to_string(),
                name: None,
                source: Some(m.source.clone()),
                destination: m.target.clone(),
            },
            MountKind::Volume => MountInfo {
                kind: "volume".to_string(),
                name: Some(m.source.clone()),
                source: Some(format!("/var/lib/docker/volumes/{}/_data", m.source)),
                destination: m.target.clone(),
            },
        })
        .collect();

    ContainerDetails {
        id: container.id.clone(),
        name: container.spec.name.clone(),
        image: Some(container.spec.image.clone()),
        labels: container.spec.labels.clone(),
        mounts,
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        !self.fail_listing.load(Ordering::SeqCst)
    }

    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        self.state
            .lock()
            .volumes
            .insert(name.to_string(), labels.clone());
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(Error::execution("Error: image not found", Some(125)));
        }

        let delay = *self.run_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.containers.iter().any(|c| c.spec.name == spec.name) {
            return Err(Error::execution("Conflict: name already in use", Some(125)));
        }
        let id = container_id();
        state.containers.push(FakeContainer {
            id: id.clone(),
            spec: spec.clone(),
        });
        Ok(id)
    }

    async fn exec_streaming(
        &self,
        container: &str,
        command: &str,
        events: EventSender,
    ) -> Result<ProcessOutput> {
        let exists = self
            .state
            .lock()
            .containers
            .iter()
            .any(|c| c.spec.name == container || c.id == container);
        if !exists {
            return Err(Error::NotFound(format!("No such container: {}", container)));
        }

        let args = vec!["-c".to_string(), command.to_string()];
        self.runner.run_streaming("sh", &args, events).await
    }

    async fn list_managed(&self, label_filter: &str) -> Result<Vec<String>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::launch("fake", "daemon not reachable"));
        }

        let (key, value) = label_filter.split_once('=').unwrap_or((label_filter, ""));
        let ids: Vec<String> = self
            .state
            .lock()
            .containers
            .iter()
            .filter(|c| c.spec.labels.get(key).is_some_and(|v| v == value))
            .map(|c| c.id.clone())
            .collect();

        let delay = *self.listing_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(ids)
    }

    async fn inspect(&self, container: &str) -> Result<ContainerDetails> {
        self.state
            .lock()
            .containers
            .iter()
            .find(|c| c.id == container || c.spec.name == container)
            .map(details)
            .ok_or_else(|| Error::NotFound(format!("No such container: {}", container)))
    }
}

/// Service over `runtime` with default config
pub fn service(runtime: &Arc<FakeRuntime>) -> WorkspaceService {
    service_with(runtime, BerthConfig::default())
}

pub fn service_with(runtime: &Arc<FakeRuntime>, config: BerthConfig) -> WorkspaceService {
    let runtime: Arc<dyn ContainerRuntime> = runtime.clone();
    WorkspaceService::new(config, runtime)
}
