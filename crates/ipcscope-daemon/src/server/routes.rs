//! JSON route handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use ipcscope_core::{Category, ProcessId, unix_millis};

use super::AppState;
use crate::supervisor::SupervisorError;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub category: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Failure rendered as `{success: false, error, solution?, details?}`.
pub enum ApiError {
    Supervisor(SupervisorError),
    BadRequest(String),
    /// A path id that does not parse cannot name a process.
    UnknownProcess(String),
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        Self::Supervisor(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::Supervisor(err) => err,
            Self::BadRequest(message) => return failure(StatusCode::BAD_REQUEST, message),
            Self::UnknownProcess(raw) => {
                return failure(StatusCode::NOT_FOUND, format!("Process not found: {raw}"));
            }
        };
        let status = match &err {
            SupervisorError::ProgramNotFound { .. }
            | SupervisorError::NotExecutable { .. }
            | SupervisorError::ProcessNotFound { .. } => StatusCode::NOT_FOUND,
            SupervisorError::InvalidProgramName { .. } => StatusCode::BAD_REQUEST,
            SupervisorError::RoleBusy { .. } => StatusCode::CONFLICT,
            SupervisorError::CommandQueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SupervisorError::SpawnFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let details = match &err {
            SupervisorError::ProgramNotFound { searched, .. } => {
                Some(format!("Searched: {}", searched.display()))
            }
            SupervisorError::NotExecutable { path } => {
                Some(format!("Missing execute permission: {}", path.display()))
            }
            SupervisorError::SpawnFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        };

        let mut body = json!({ "success": false, "error": err.to_string() });
        if let Some(hint) = err.hint() {
            body["solution"] = hint.into();
        }
        if let Some(details) = details {
            body["details"] = details.into();
        }
        (status, Json(body)).into_response()
    }
}

fn failure(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

fn parse_id(raw: &str) -> Result<ProcessId, ApiError> {
    raw.parse().map_err(|_| ApiError::UnknownProcess(raw.to_string()))
}

/// `POST /api/run`
pub async fn run(
    State(state): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let category: Category = req
        .category
        .parse()
        .map_err(|e: ipcscope_core::Error| ApiError::BadRequest(e.to_string()))?;
    let id = state
        .supervisor
        .start(category, &req.program, req.args)
        .await
        .inspect_err(|e| {
            warn!(category = %category, program = %req.program, error = %e, "Start rejected");
        })?;
    Ok(Json(json!({
        "success": true,
        "processId": id,
        "message": format!("Started {category}/{}", req.program),
    })))
}

/// `POST /api/process/{id}/stop`
pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    state.supervisor.stop(id).await?;
    info!(process_id = %id, "Stop requested over HTTP");
    Ok(Json(json!({
        "success": true,
        "message": format!("Stop signal sent to process {id}"),
    })))
}

/// `POST /api/process/{id}/command`
pub async fn command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    state.supervisor.send_command(id, &req.command).await?;
    Ok(Json(json!({ "success": true })))
}

/// `GET /api/processes`
pub async fn processes(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.supervisor.list_processes().await)
}

/// `GET /api/process/{id}`
pub async fn process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    state
        .supervisor
        .process(id)
        .await
        .map(Json)
        .ok_or(ApiError::Supervisor(SupervisorError::ProcessNotFound { id }))
}

/// `GET /api/programs`
pub async fn programs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.supervisor.list_programs())
}

/// `GET /api/state`
pub async fn mirror_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.supervisor.mirror().await)
}

/// `GET /api/test`
pub async fn liveness() -> impl IntoResponse {
    Json(json!({
        "message": "ipcscope daemon is running",
        "timestamp": unix_millis(),
        "status": "OK",
    }))
}

/// `GET /api/debug`: where the daemon looks for demos and what it is serving.
pub async fn diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    let supervisor = &state.supervisor;
    let backend_dir = supervisor.backend_dir();
    let categories: serde_json::Map<String, serde_json::Value> = Category::ALL
        .into_iter()
        .map(|c| (c.to_string(), backend_dir.join(c.as_str()).is_dir().into()))
        .collect();
    Json(json!({
        "success": true,
        "backendDir": backend_dir.display().to_string(),
        "backendExists": backend_dir.is_dir(),
        "categories": categories,
        "liveProcesses": supervisor.live_count().await,
        "bus": supervisor.bus().stats().await,
        "timestamp": unix_millis(),
    }))
}

/// Any unmatched route.
pub async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Route not found", "path": uri.path() })),
    )
}
