//! CLI runtime - drives `docker` or `podman` through the Process Runner

use super::{shell_command, ContainerDetails, ContainerRuntime, ContainerSpec, MountInfo};
use crate::process::{EventSender, ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use berth_foundation::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Runtime backed by a docker-compatible binary
#[derive(Debug, Clone)]
pub struct CliRuntime {
    program: String,
    runner: ProcessRunner,
}

impl CliRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            runner: ProcessRunner::new(),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.runner = self.runner.with_heartbeat(heartbeat);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: Vec<String>) -> Result<ProcessOutput> {
        self.runner.run(&self.program, &args).await
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    fn name(&self) -> &str {
        &self.program
    }

    async fn is_available(&self) -> bool {
        self.run(vec!["version".to_string()]).await.is_ok()
    }

    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let mut args = vec!["volume".to_string(), "create".to_string()];
        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(name.to_string());

        self.run(args).await?;
        debug!("Created volume {}", name);
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        let output = self.run(spec.run_args()).await?;
        let id = output.stdout.trim().to_string();
        if id.is_empty() {
            return Err(Error::Internal(format!(
                "{} run printed no container id",
                self.program
            )));
        }
        Ok(id)
    }

    async fn exec_streaming(
        &self,
        container: &str,
        command: &str,
        events: EventSender,
    ) -> Result<ProcessOutput> {
        let mut args = vec!["exec".to_string(), container.to_string()];
        args.extend(shell_command(command));
        self.runner.run_streaming(&self.program, &args, events).await
    }

    async fn list_managed(&self, label_filter: &str) -> Result<Vec<String>> {
        let output = self
            .run(vec![
                "ps".to_string(),
                "-a".to_string(),
                "-q".to_string(),
                "--no-trunc".to_string(),
                "--filter".to_string(),
                format!("label={}", label_filter),
            ])
            .await?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn inspect(&self, container: &str) -> Result<ContainerDetails> {
        let output = self
            .run(vec![
                "inspect".to_string(),
                "--type".to_string(),
                "container".to_string(),
                container.to_string(),
            ])
            .await
            .map_err(|e| match e {
                Error::ExecutionFailure { ref stderr, .. } if is_missing_object(stderr) => {
                    Error::NotFound(format!("container {}", container))
                }
                e => e,
            })?;

        parse_inspect(&output.stdout)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("container {}", container)))
    }
}

/// docker says "No such container", podman "no such container" or "no such object"
fn is_missing_object(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such container") || stderr.contains("no such object")
}

// ============================================================================
// `inspect` JSON
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectJson {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    config: Option<InspectConfig>,
    #[serde(default)]
    mounts: Option<Vec<InspectMount>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectMount {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    destination: String,
}

fn parse_inspect(json: &str) -> Result<Vec<ContainerDetails>> {
    let raw: Vec<InspectJson> = serde_json::from_str(json)?;

    Ok(raw
        .into_iter()
        .map(|c| {
            let (labels, image) = match c.config {
                Some(config) => (config.labels.unwrap_or_default(), config.image),
                None => (HashMap::new(), None),
            };

            ContainerDetails {
                id: c.id,
                name: c.name.trim_start_matches('/').to_string(),
                image,
                labels: labels.into_iter().collect(),
                mounts: c
                    .mounts
                    .unwrap_or_default()
                    .into_iter()
                    .map(|m| MountInfo {
                        kind: m.kind.to_ascii_lowercase(),
                        name: m.name.filter(|n| !n.is_empty()),
                        source: m.source.filter(|s| !s.is_empty()),
                        destination: m.destination,
                    })
                    .collect(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT: &str = r#"[
      {
        "Id": "abc123def4567890",
        "Name": "/berth-demo-000001",
        "Config": {
          "Image": "alpine:3",
          "Labels": {"berth.managed": "true", "berth.workspace.id": "ws-1"}
        },
        "Mounts": [
          {"Type": "bind", "Source": "/src/demo", "Destination": "/workspace/project", "RW": true},
          {"Type": "volume", "Name": "berth-state-demo", "Source": "/var/lib/docker/volumes/x", "Destination": "/codex-home"}
        ]
      }
    ]"#;

    #[test]
    fn test_parse_inspect() {
        let details = parse_inspect(INSPECT).unwrap();
        assert_eq!(details.len(), 1);

        let c = &details[0];
        assert_eq!(c.name, "berth-demo-000001");
        assert_eq!(c.image.as_deref(), Some("alpine:3"));
        assert_eq!(c.label("berth.workspace.id"), Some("ws-1"));

        let code = c.mount_at("/workspace/project").unwrap();
        assert!(code.is_bind());
        assert_eq!(code.source.as_deref(), Some("/src/demo"));

        let home = c.mount_at("/codex-home").unwrap();
        assert!(home.is_volume());
        assert_eq!(home.name.as_deref(), Some("berth-state-demo"));
    }

    #[test]
    fn test_parse_inspect_null_labels() {
        let details =
            parse_inspect(r#"[{"Id": "x", "Name": "/n", "Config": {"Labels": null}, "Mounts": null}]"#)
                .unwrap();
        assert!(details[0].labels.is_empty());
        assert!(details[0].mounts.is_empty());
    }

    #[test]
    fn test_missing_object_messages() {
        assert!(is_missing_object("Error: No such container: deadbeef0001"));
        assert!(is_missing_object("Error: no such object: \"x\""));
        assert!(!is_missing_object("permission denied while trying to connect"));
    }

    /// Engine stub whose container is gone by the time it is inspected
    #[cfg(unix)]
    fn vanishing_engine(dir: &std::path::Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("engine");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             case \"$1\" in\n\
               ps) echo deadbeef0001 ;;\n\
               inspect) echo 'Error: No such container: deadbeef0001' >&2; exit 1 ;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inspect_of_removed_container_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = CliRuntime::new(vanishing_engine(dir.path()).to_string_lossy());

        let err = runtime.inspect("deadbeef0001").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let registry = crate::registry::WorkspaceRegistry::default();
        let report = registry
            .reconcile_from_runtime(&runtime, &berth_foundation::BerthConfig::default())
            .await
            .unwrap();
        assert_eq!(report.workspaces, 0);
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let runtime = CliRuntime::new("berth-no-such-engine");
        assert!(!runtime.is_available().await);
        let err = runtime.list_managed("berth.managed=true").await.unwrap_err();
        assert!(matches!(err, Error::LaunchFailure { .. }));
    }
}
