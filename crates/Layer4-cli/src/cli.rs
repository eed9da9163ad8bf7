//! One-shot commands
//!
//! Each command reconciles first, so the container labels decide which
//! workspaces exist.

use berth_task::{ProvisionRequest, Target, WorkspaceService};
use std::path::PathBuf;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

/// Workspace selection flags shared by the per-workspace commands
#[derive(clap::Args, Debug, Default)]
pub struct ProjectArgs {
    /// Workspace id
    #[arg(short, long)]
    pub project: Option<String>,

    /// Host directory of the workspace
    #[arg(long)]
    pub path: Option<PathBuf>,
}

impl ProjectArgs {
    fn target(&self) -> Target<'_> {
        Target::from_options(self.project.as_deref(), self.path.as_deref())
    }
}

async fn reconcile(service: &WorkspaceService) {
    if let Err(e) = service.reconcile().await {
        warn!("{}", e);
    }
}

pub async fn provision(service: &WorkspaceService, args: ProvisionArgs) -> anyhow::Result<()> {
    let workspace = service.provision(args.into()).await?;

    println!("\n✓ Workspace ready\n");
    println!("  ID:         {}", workspace.id);
    println!("  Container:  {}", workspace.container_name);
    println!(
        "  Code:       {} -> {}",
        workspace.host_path.display(),
        workspace.code_mount_path
    );
    println!(
        "  Home:       {} -> {}",
        workspace.state_store.describe(),
        workspace.home_path
    );
    println!();
    Ok(())
}

pub async fn list(service: &WorkspaceService) -> anyhow::Result<()> {
    let workspaces = service.list().await;

    if workspaces.is_empty() {
        println!("No workspaces found.");
        return Ok(());
    }

    println!("{:<20} {:<24} {:<12} {}", "ID", "Name", "Status", "Path");
    println!("{}", "-".repeat(80));

    for workspace in workspaces {
        let status = service
            .registry()
            .status(&workspace.id)
            .unwrap_or_default();
        println!(
            "{:<20} {:<24} {:<12} {}",
            workspace.id.as_str(),
            truncate(&workspace.name, 22),
            status.status.as_str(),
            workspace.host_path.display()
        );
    }

    println!("\nUse 'berth run <command> --project <ID>' to run a command.");
    Ok(())
}

pub async fn status(service: &WorkspaceService, project: &ProjectArgs) -> anyhow::Result<()> {
    reconcile(service).await;
    let workspace = service.resolve(project.target())?;
    let status = service.status(Target::id(workspace.id.as_str()))?;

    println!("{} ({})", workspace.name, workspace.id);
    println!("  Status:    {}", status.status);
    println!("  Progress:  {}%", status.progress);
    println!("  Step:      {}", status.current_step);
    Ok(())
}

pub async fn logs(service: &WorkspaceService, project: &ProjectArgs) -> anyhow::Result<()> {
    reconcile(service).await;
    for entry in service.logs(project.target())? {
        println!("{}", entry.format_line());
    }
    Ok(())
}

/// Run a shortcut or raw command, printing the log as it grows
pub async fn run(
    service: &WorkspaceService,
    project: &ProjectArgs,
    command: &str,
) -> anyhow::Result<()> {
    reconcile(service).await;
    let workspace = service.resolve(project.target())?;
    let target = Target::id(workspace.id.as_str());

    let (_, mut entries) = service.follow_logs(target)?;
    let mut dispatched = service.dispatch_command(target, command)?;

    let mut open = true;
    let result = loop {
        tokio::select! {
            entry = entries.recv(), if open => match entry {
                Ok(entry) => println!("{}", entry.format_line()),
                Err(RecvError::Lagged(n)) => warn!("Skipped {} log entries", n),
                Err(RecvError::Closed) => open = false,
            },
            result = &mut dispatched.handle => break result,
        }
    };

    loop {
        match entries.try_recv() {
            Ok(entry) => println!("{}", entry.format_line()),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    result??;
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Flags of `berth provision`
#[derive(clap::Args, Debug)]
pub struct ProvisionArgs {
    /// Host directory with the code
    pub path: PathBuf,

    /// Display name (defaults to the directory name)
    #[arg(long)]
    pub name: Option<String>,

    /// Container image
    #[arg(long)]
    pub image: Option<String>,

    /// Code mount path inside the container
    #[arg(long)]
    pub code_mount: Option<String>,

    /// Home/state path inside the container
    #[arg(long)]
    pub home_path: Option<String>,

    /// Host directory used as home instead of a managed volume
    #[arg(long)]
    pub system_path: Option<PathBuf>,
}

impl From<ProvisionArgs> for ProvisionRequest {
    fn from(args: ProvisionArgs) -> Self {
        ProvisionRequest {
            host_path: args.path,
            name: args.name,
            image: args.image,
            code_mount_path: args.code_mount,
            home_path: args.home_path,
            system_host_path: args.system_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-workspace-name", 10), "a-very-...");
    }
}
