//! Docker Engine API runtime (bollard)

use super::{
    shell_command, ContainerDetails, ContainerRuntime, ContainerSpec, MountInfo, MountKind,
};
use crate::process::{EventSender, ProcessOutput, StreamPump, DEFAULT_HEARTBEAT};
use async_trait::async_trait;
use berth_foundation::{Error, Result};
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ExecInspectResponse, HostConfig, Mount, MountTypeEnum};
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

const EXEC_SETTLE_POLL: Duration = Duration::from_millis(50);
const EXEC_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime talking to the local Docker daemon socket
pub struct DockerApiRuntime {
    docker: Docker,
    heartbeat: Duration,
}

impl DockerApiRuntime {
    /// Connect with the local defaults (`DOCKER_HOST` or the default socket)
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::launch("docker", e))?;
        Ok(Self {
            docker,
            heartbeat: DEFAULT_HEARTBEAT,
        })
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat.max(Duration::from_millis(1));
        self
    }

    /// Exit code of a finished exec.
    ///
    /// The daemon may still report the exec as running right after its
    /// output stream closes, so poll until it settles.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let deadline = Instant::now() + EXEC_SETTLE_TIMEOUT;
        loop {
            let inspect = self
                .docker
                .inspect_exec(exec_id)
                .await
                .map_err(|e| api_error("Failed to inspect exec", e))?;

            if let Some(code) = settled_exit_code(&inspect) {
                return Ok(code);
            }
            if Instant::now() >= deadline {
                debug!("Exec {} still reported running, giving up", exec_id);
                return Ok(inspect.exit_code);
            }
            tokio::time::sleep(EXEC_SETTLE_POLL).await;
        }
    }
}

/// Map engine errors onto the berth taxonomy
fn api_error(context: &str, err: BollardError) -> Error {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => Error::NotFound(message),
        BollardError::DockerResponseServerError { message, .. } => {
            Error::Internal(format!("{}: {}", context, message))
        }
        other => Error::launch("docker", format!("{}: {}", context, other)),
    }
}

fn to_hash_map(map: &BTreeMap<String, String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

#[async_trait]
impl ContainerRuntime for DockerApiRuntime {
    fn name(&self) -> &str {
        "docker-api"
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels: to_hash_map(labels),
            ..Default::default()
        };

        self.docker
            .create_volume(options)
            .await
            .map_err(|e| api_error("Failed to create volume", e))?;

        debug!("Created volume {}", name);
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mounts: Vec<Mount> = spec
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.clone()),
                typ: Some(match m.kind {
                    MountKind::Bind => MountTypeEnum::BIND,
                    MountKind::Volume => MountTypeEnum::VOLUME,
                }),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let tmpfs: HashMap<String, String> = spec
            .tmpfs
            .iter()
            .map(|path| (path.clone(), String::new()))
            .collect();

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(env),
            working_dir: Some(spec.working_dir.clone()),
            labels: Some(to_hash_map(&spec.labels)),
            host_config: Some(HostConfig {
                mounts: Some(mounts),
                readonly_rootfs: Some(spec.read_only_root),
                tmpfs: Some(tmpfs),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| api_error("Failed to create container", e))?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| api_error("Failed to start container", e))?;

        Ok(response.id)
    }

    async fn exec_streaming(
        &self,
        container: &str,
        command: &str,
        events: EventSender,
    ) -> Result<ProcessOutput> {
        let exec_options = CreateExecOptions {
            cmd: Some(shell_command(command)),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container, exec_options)
            .await
            .map_err(|e| api_error("Failed to create exec", e))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| api_error("Failed to start exec", e))?;

        let mut pump = StreamPump::new(Some(events));

        if let StartExecResults::Attached { mut output, .. } = started {
            let start = Instant::now();
            let mut ticker = tokio::time::interval_at(start + self.heartbeat, self.heartbeat);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    chunk = output.next() => match chunk {
                        Some(Ok(LogOutput::StdOut { message }))
                        | Some(Ok(LogOutput::Console { message })) => pump.stdout(&message),
                        Some(Ok(LogOutput::StdErr { message })) => pump.stderr(&message),
                        Some(Ok(LogOutput::StdIn { .. })) => {}
                        Some(Err(e)) => return Err(api_error("Exec stream failed", e)),
                        None => break,
                    },
                    _ = ticker.tick() => pump.heartbeat(start.elapsed().as_secs()),
                }
            }
        }

        let output = pump.finish();

        match self.exec_exit_code(&exec.id).await? {
            Some(0) => Ok(output),
            code => Err(Error::execution(output.stderr, code.map(|c| c as i32))),
        }
    }

    async fn list_managed(&self, label_filter: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label_filter.to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| api_error("Failed to list containers", e))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect(&self, container: &str) -> Result<ContainerDetails> {
        let info = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| api_error("Failed to inspect container", e))?;

        let (labels, image) = match info.config {
            Some(config) => (config.labels.unwrap_or_default(), config.image),
            None => (HashMap::new(), None),
        };

        let mounts = info
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| MountInfo {
                kind: m.typ.map(|t| t.to_string()).unwrap_or_default(),
                name: m.name.filter(|n| !n.is_empty()),
                source: m.source.filter(|s| !s.is_empty()),
                destination: m.destination.unwrap_or_default(),
            })
            .collect();

        Ok(ContainerDetails {
            id: info.id.unwrap_or_else(|| container.to_string()),
            name: info
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image,
            labels: labels.into_iter().collect(),
            mounts,
        })
    }
}

/// `None` while the exec is running, otherwise its exit code
fn settled_exit_code(inspect: &ExecInspectResponse) -> Option<Option<i64>> {
    match (inspect.running, inspect.exit_code) {
        (Some(true), _) => None,
        (Some(false), code) => Some(code),
        (None, Some(code)) => Some(Some(code)),
        (None, None) => None,
    }
}
