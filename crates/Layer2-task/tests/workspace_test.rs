//! Workspace lifecycle tests against the in-memory runtime
//!
//! `cargo test -p berth-task --test workspace_test`

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use berth_foundation::{BerthConfig, Error};
use berth_task::{
    LogKind, MountKind, ProvisionRequest, RunState, StateStore, Target, READY_STEP,
    RECOVERED_STEP,
};
use common::{service, service_with, FakeRuntime};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn project_dir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let canonical = fs::canonicalize(dir.path()).unwrap();
    (dir, canonical)
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn test_provision_registers_and_resolves_by_host_path() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();

    let workspace = service
        .provision(ProvisionRequest::new(&path).name("Demo App"))
        .await
        .unwrap();

    assert_eq!(workspace.host_path, path);
    assert_eq!(workspace.name, "Demo App");
    assert!(workspace.container_name.starts_with("berth-demo-app-"));

    let resolved = service.resolve(Target::path(&path)).unwrap();
    assert_eq!(resolved.id, workspace.id);

    let status = service.status(Target::id(workspace.id.as_str())).unwrap();
    assert_eq!(status.status, RunState::Idle);
    assert_eq!(status.current_step, READY_STEP);

    let logs = service.logs(Target::any()).unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|e| e.kind == LogKind::Info));
    assert!(logs[0].message.contains(&workspace.container_name));
}

#[tokio::test]
async fn test_provisioned_container_isolates_code() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();

    let workspace = service.provision(ProvisionRequest::new(&path)).await.unwrap();

    let containers = runtime.containers();
    assert_eq!(containers.len(), 1);
    let spec = &containers[0].spec;
    assert!(spec.read_only_root);
    assert_eq!(spec.working_dir, workspace.code_mount_path);
    assert!(spec
        .env
        .contains(&("HOME".to_string(), workspace.home_path.clone())));

    let code = spec
        .mounts
        .iter()
        .find(|m| m.target == workspace.code_mount_path)
        .unwrap();
    assert_eq!(code.kind, MountKind::Bind);
    assert_eq!(PathBuf::from(&code.source), path);

    let home = spec
        .mounts
        .iter()
        .find(|m| m.target == workspace.home_path)
        .unwrap();
    assert_eq!(home.kind, MountKind::Volume);
    assert_eq!(Some(home.source.as_str()), workspace.state_store.managed_volume());
    assert_eq!(runtime.volumes(), vec![home.source.clone()]);
}

#[tokio::test]
async fn test_system_host_path_replaces_managed_volume() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    let (_home, home_path) = project_dir();

    let workspace = service
        .provision(ProvisionRequest::new(&path).system_host_path(&home_path))
        .await
        .unwrap();

    assert_eq!(
        workspace.state_store,
        StateStore::HostBind {
            path: home_path.clone()
        }
    );
    assert!(runtime.volumes().is_empty());

    let spec = &runtime.containers()[0].spec;
    let home = spec
        .mounts
        .iter()
        .find(|m| m.target == workspace.home_path)
        .unwrap();
    assert_eq!(home.kind, MountKind::Bind);
}

#[tokio::test]
async fn test_provision_missing_path_registers_nothing() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);

    let err = service
        .provision(ProvisionRequest::new("/definitely/not/here/berth"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PathNotFound(_)));
    assert!(service.registry().is_empty());
    assert!(runtime.containers().is_empty());
    assert!(runtime.volumes().is_empty());
}

#[tokio::test]
async fn test_provision_runtime_failure_registers_nothing() {
    let runtime = FakeRuntime::new();
    runtime.set_fail_run(true);
    let service = service(&runtime);
    let (_dir, path) = project_dir();

    let err = service
        .provision(ProvisionRequest::new(&path))
        .await
        .unwrap_err();

    match err {
        Error::ProvisionFailure(reason) => assert!(reason.contains("image not found")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn test_operations_without_workspace() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);

    assert!(matches!(
        service.status(Target::any()),
        Err(Error::NoActiveWorkspace)
    ));
    assert!(matches!(
        service.execute(Target::any(), "echo hi").await,
        Err(Error::NoActiveWorkspace)
    ));
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn test_execute_success_streams_stdout() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    let output = service.execute(Target::any(), "echo hello").await.unwrap();
    assert_eq!(output.stdout, "hello\n");

    let status = service.status(Target::any()).unwrap();
    assert_eq!(status.status, RunState::Completed);
    assert_eq!(status.progress, 100);

    let logs = service.logs(Target::any()).unwrap();
    let messages: Vec<(LogKind, &str)> = logs[2..]
        .iter()
        .map(|e| (e.kind, e.message.as_str()))
        .collect();
    assert!(messages[0].1.starts_with("Running command in "));
    assert_eq!(messages[1], (LogKind::Info, "> echo hello"));
    assert_eq!(messages[2], (LogKind::Stdout, "hello"));
    assert_eq!(messages[3].0, LogKind::Info);
    assert!(messages[3].1.starts_with("Command finished in "));
}

#[tokio::test]
async fn test_execute_failure_records_error() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    let err = service
        .execute(Target::any(), "echo boom >&2; exit 7")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ExecutionFailure {
            exit_code: Some(7),
            ..
        }
    ));

    let status = service.status(Target::any()).unwrap();
    assert_eq!(status.status, RunState::Error);
    assert_eq!(status.progress, 100);

    let logs = service.logs(Target::any()).unwrap();
    assert!(logs
        .iter()
        .any(|e| e.kind == LogKind::Warning && e.message == "boom"));
    let last = logs.last().unwrap();
    assert_eq!(last.kind, LogKind::Error);
    assert!(last.message.contains("exit code 7"));
}

#[tokio::test]
async fn test_stderr_alone_does_not_fail() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    service
        .execute(Target::any(), "echo careful >&2")
        .await
        .unwrap();
    assert_eq!(
        service.status(Target::any()).unwrap().status,
        RunState::Completed
    );
}

#[tokio::test]
async fn test_line_split_across_writes() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    service
        .execute(Target::any(), "printf 'partial'; sleep 0.2; printf ' line\\n'")
        .await
        .unwrap();

    let stdout: Vec<String> = service
        .logs(Target::any())
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == LogKind::Stdout)
        .map(|e| e.message)
        .collect();
    assert_eq!(stdout, vec!["partial line"]);
}

#[tokio::test]
async fn test_log_buffer_keeps_most_recent_entries() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    service.execute(Target::any(), "seq 1 600").await.unwrap();

    let logs = service.logs(Target::any()).unwrap();
    assert_eq!(logs.len(), 500);
    // 2 provisioning + 2 run headers + 600 lines + 1 footer, oldest 105 dropped
    assert_eq!(logs[0].message, "102");
    assert!(logs[499].message.starts_with("Command finished"));
}

#[tokio::test]
async fn test_heartbeat_moves_running_status() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    let dispatched = service.dispatch_command(Target::any(), "sleep 1").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = service.status(Target::any()).unwrap();
    assert_eq!(status.status, RunState::Running);
    assert!(status.current_step.starts_with("running for"));
    assert!(status.progress >= 20 && status.progress <= 95);

    dispatched.handle.await.unwrap().unwrap();
    assert_eq!(
        service.status(Target::any()).unwrap().status,
        RunState::Completed
    );
}

#[tokio::test]
async fn test_second_run_is_rejected_while_busy() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    let dispatched = service.dispatch_command(Target::any(), "sleep 0.5").unwrap();
    let status = service.status(Target::any()).unwrap();
    assert_eq!(status.status, RunState::Running);
    assert_eq!(status.current_step, "starting: sleep 0.5");

    let err = service.execute(Target::any(), "echo hi").await.unwrap_err();
    assert!(matches!(err, Error::WorkspaceBusy(_)));
    assert_eq!(
        service.status(Target::any()).unwrap().status,
        RunState::Running
    );

    dispatched.handle.await.unwrap().unwrap();
    service.execute(Target::any(), "echo hi").await.unwrap();
}

#[tokio::test]
async fn test_shortcut_and_prompt_template() {
    let runtime = FakeRuntime::new();
    let mut config = BerthConfig::default();
    config.prompt_template = Some("echo {prompt}".to_string());
    let service = service_with(&runtime, config);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    let output = service
        .prompt(Target::any(), "hello; world")
        .await
        .unwrap();
    assert_eq!(output.stdout, "hello; world\n");

    // `git status` fails outside a repository; only the expansion matters here
    let _ = service.run_command(Target::any(), "create-pr").await;
    let logs = service.logs(Target::any()).unwrap();
    assert!(logs.iter().any(|e| e.message == "> git status --short"));

    assert!(matches!(
        service.prompt(Target::any(), "  ").await,
        Err(Error::InvalidInput(_))
    ));
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_reconcile_after_restart_keeps_ids() {
    let runtime = FakeRuntime::new();
    let (_a, path_a) = project_dir();
    let (_b, path_b) = project_dir();

    let mut ids = {
        let first = service(&runtime);
        let a = first.provision(ProvisionRequest::new(&path_a)).await.unwrap();
        let b = first.provision(ProvisionRequest::new(&path_b)).await.unwrap();
        vec![a.id, b.id]
    };
    ids.sort();

    let restarted = service(&runtime);
    let report = restarted.reconcile().await.unwrap();
    assert_eq!(report.workspaces, 2);
    assert_eq!(report.recovered, 2);

    let mut found: Vec<_> = restarted.registry().list().into_iter().map(|w| w.id).collect();
    found.sort();
    assert_eq!(found, ids);

    let report = restarted.reconcile().await.unwrap();
    assert_eq!(report.recovered, 0);
    let mut again: Vec<_> = restarted.registry().list().into_iter().map(|w| w.id).collect();
    again.sort();
    assert_eq!(again, ids);

    let recovered = restarted.resolve(Target::path(&path_a)).unwrap();
    let status = restarted.status(Target::id(recovered.id.as_str())).unwrap();
    assert_eq!(status.current_step, RECOVERED_STEP);
    assert_eq!(restarted.logs(Target::path(&path_a)).unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconcile_preserves_known_status_and_drops_removed() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_a, path_a) = project_dir();
    let (_b, path_b) = project_dir();

    let a = service.provision(ProvisionRequest::new(&path_a)).await.unwrap();
    let b = service.provision(ProvisionRequest::new(&path_b)).await.unwrap();
    service
        .execute(Target::id(a.id.as_str()), "echo done")
        .await
        .unwrap();
    let logs_before = service.logs(Target::id(a.id.as_str())).unwrap().len();

    runtime.remove_container(&b.container_name);
    let report = service.reconcile().await.unwrap();
    assert_eq!(report.workspaces, 1);

    assert!(service.registry().get(&b.id).is_none());
    assert_eq!(
        service.status(Target::id(a.id.as_str())).unwrap().status,
        RunState::Completed
    );
    assert_eq!(
        service.logs(Target::id(a.id.as_str())).unwrap().len(),
        logs_before
    );
}

#[tokio::test]
async fn test_reconcile_keeps_workspace_registered_during_listing() {
    let runtime = FakeRuntime::new();
    let service = Arc::new(service(&runtime));
    let (_dir, path) = project_dir();

    runtime.set_run_delay(Duration::from_millis(100));
    runtime.set_listing_delay(Duration::from_millis(200));

    let provisioning = tokio::spawn({
        let service = service.clone();
        let path = path.clone();
        async move { service.provision(ProvisionRequest::new(&path)).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Lists before the container exists, finishes after registration
    let report = service.reconcile().await.unwrap();
    let workspace = provisioning.await.unwrap().unwrap();

    assert_eq!(report.workspaces, 1);
    assert_eq!(runtime.containers().len(), 1);
    let resolved = service.resolve(Target::id(workspace.id.as_str())).unwrap();
    assert_eq!(resolved.host_path, path);
    assert_eq!(
        service.status(Target::id(workspace.id.as_str())).unwrap().current_step,
        READY_STEP
    );
    assert_eq!(service.logs(Target::id(workspace.id.as_str())).unwrap().len(), 2);

    // The next pass sees the container and keeps it
    runtime.set_listing_delay(Duration::ZERO);
    let report = service.reconcile().await.unwrap();
    assert_eq!(report.workspaces, 1);
    assert_eq!(report.recovered, 0);
}

#[tokio::test]
async fn test_reconcile_skipped_when_runtime_unreachable() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    let workspace = service.provision(ProvisionRequest::new(&path)).await.unwrap();

    runtime.set_fail_listing(true);
    let err = service.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::ReconciliationSkipped(_)));

    // State untouched, listing falls back to what is known
    let listed = service.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, workspace.id);
    assert!(!service.health().await.runtime_available);
}

// ============================================================================
// Files
// ============================================================================

fn zip_payload(entries: &[(&str, &str)]) -> String {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    STANDARD.encode(writer.finish().unwrap().into_inner())
}

#[tokio::test]
async fn test_upload_archive_extracts_into_host_path() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    let payload = zip_payload(&[("src/App.java", "class App {}"), ("README.md", "hi")]);
    let result = service
        .upload_archive(Target::path(&path), "project.zip", &payload)
        .await
        .unwrap();

    assert_eq!(result.extracted_files, 2);
    assert_eq!(result.target_path, path);
    assert!(path.join("src/App.java").is_file());

    let last = service.logs(Target::any()).unwrap().pop().unwrap();
    assert_eq!(last.kind, LogKind::Info);
    assert!(last.message.contains("2 files"));
}

#[tokio::test]
async fn test_upload_rejects_non_zip_and_logs_error() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    let err = service
        .upload_archive(Target::any(), "project.tar", "AAAA")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let last = service.logs(Target::any()).unwrap().pop().unwrap();
    assert_eq!(last.kind, LogKind::Error);
}

#[tokio::test]
async fn test_latest_artifact() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    assert!(matches!(
        service.latest_artifact(Target::any()).await,
        Err(Error::NotFound(_))
    ));

    fs::create_dir_all(path.join("build/libs")).unwrap();
    fs::write(path.join("build/libs/app-1.0.jar"), b"jar").unwrap();
    fs::write(path.join("build/libs/app-1.0-sources.jar"), b"src").unwrap();

    let artifact = service.latest_artifact(Target::any()).await.unwrap();
    assert_eq!(artifact, path.join("build/libs/app-1.0.jar"));
}

#[tokio::test]
async fn test_health() {
    let runtime = FakeRuntime::new();
    let service = service(&runtime);
    let (_dir, path) = project_dir();
    service.provision(ProvisionRequest::new(&path)).await.unwrap();

    let health = service.health().await;
    assert_eq!(health.workspaces, 1);
    assert_eq!(health.runtime, "fake");
    assert!(health.runtime_available);
}
