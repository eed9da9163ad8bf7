//! Request handlers

use super::error::ApiError;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use berth_task::{
    ExecutionStatus, Health, LogEntry, ProvisionRequest, Target, UploadResult, Workspace,
    WorkspaceService,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

pub type ApiState = Arc<WorkspaceService>;

/// Workspace selector shared by queries and bodies
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSelector {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
}

impl ProjectSelector {
    pub fn target(&self) -> Target<'_> {
        Target::from_options(self.project_id.as_deref(), self.project_path.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    #[serde(flatten)]
    pub project: ProjectSelector,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(flatten)]
    pub project: ProjectSelector,
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[serde(flatten)]
    pub project: ProjectSelector,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub zip_base64: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub health: Health,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub accepted: bool,
    pub message: String,
}

pub async fn health(State(service): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        health: service.health().await,
    })
}

pub async fn list_projects(State(service): State<ApiState>) -> Json<Vec<Workspace>> {
    Json(service.list().await)
}

pub async fn create_workspace(
    State(service): State<ApiState>,
    Json(request): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<Workspace>), ApiError> {
    let workspace = service.provision(request).await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

pub async fn status(
    State(service): State<ApiState>,
    Query(query): Query<ProjectSelector>,
) -> Result<Json<ExecutionStatus>, ApiError> {
    Ok(Json(service.status(query.target())?))
}

pub async fn logs(
    State(service): State<ApiState>,
    Query(query): Query<ProjectSelector>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    Ok(Json(service.logs(query.target())?))
}

pub async fn prompt(
    State(service): State<ApiState>,
    Json(request): Json<PromptRequest>,
) -> Result<(StatusCode, Json<PromptResponse>), ApiError> {
    service.dispatch_prompt(request.project.target(), &request.prompt)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(PromptResponse {
            task_id: Utc::now().timestamp_millis().to_string(),
        }),
    ))
}

pub async fn run(
    State(service): State<ApiState>,
    Json(request): Json<RunRequest>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let dispatched = service.dispatch_command(request.project.target(), &request.command)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunResponse {
            accepted: true,
            message: format!("Dispatched: {}", dispatched.command),
        }),
    ))
}

pub async fn upload_zip(
    State(service): State<ApiState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadResult>, ApiError> {
    let result = service
        .upload_archive(
            request.project.target(),
            &request.file_name,
            &request.zip_base64,
        )
        .await?;
    Ok(Json(result))
}

pub async fn download_artifact(
    State(service): State<ApiState>,
    Query(query): Query<ProjectSelector>,
) -> Result<Response, ApiError> {
    let path = service.latest_artifact(query.target()).await?;
    let file = tokio::fs::File::open(&path).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, "application/java-archive".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&path)),
        ],
        body,
    )
        .into_response())
}

/// `attachment` header value carrying the artifact file name
fn content_disposition(path: &Path) -> String {
    let name: String = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact.jar".to_string())
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{}\"", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition(Path::new("/p/build/libs/app-1.0.jar")),
            "attachment; filename=\"app-1.0.jar\""
        );
        assert_eq!(
            content_disposition(Path::new("/p/we\"ird.jar")),
            "attachment; filename=\"weird.jar\""
        );
    }

    #[test]
    fn test_request_bodies() {
        let run: RunRequest =
            serde_json::from_str(r#"{"projectId": "ws-1", "command": "test"}"#).unwrap();
        assert_eq!(run.project.project_id.as_deref(), Some("ws-1"));
        assert_eq!(run.command, "test");

        let upload: UploadRequest = serde_json::from_str(
            r#"{"projectPath": "/src/app", "fileName": "a.zip", "zipBase64": "UEs="}"#,
        )
        .unwrap();
        assert_eq!(upload.project.project_path, Some(PathBuf::from("/src/app")));
        assert_eq!(upload.file_name, "a.zip");
        assert!(upload.project.project_id.is_none());
    }
}
