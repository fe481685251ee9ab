use crate::api::dto::command::{
    CommandLogResponse, CommandResponse, CommandsListResponse, ListCommandsQuery, LogQuery,
    RemoveCommandQuery, ReportsResponse,
};
use crate::api::routes::AppState;
use crate::error::Result;
use crate::models::{CommandStatus, CommandUpdate, NewCommand};
use crate::services::LogKind;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};

pub async fn create_command(
    State(state): State<AppState>,
    Json(req): Json<NewCommand>,
) -> Result<(StatusCode, Json<CommandResponse>)> {
    let command = state.engine.create(req).await?;
    Ok((StatusCode::CREATED, Json(CommandResponse::from(command))))
}

pub async fn list_commands(
    State(state): State<AppState>,
    Query(query): Query<ListCommandsQuery>,
) -> Result<Json<CommandsListResponse>> {
    let commands = match query.status {
        Some(raw) => {
            let status: CommandStatus = raw.parse()?;
            state.engine.list_by_status(status).await?
        }
        None => state.engine.list().await?,
    };

    Ok(Json(CommandsListResponse {
        data: commands.into_iter().map(CommandResponse::from).collect(),
    }))
}

pub async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>> {
    let command = state.engine.get(&id).await?;
    Ok(Json(CommandResponse::from(command)))
}

pub async fn update_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CommandUpdate>,
) -> Result<Json<CommandResponse>> {
    let command = state.engine.update(&id, req).await?;
    Ok(Json(CommandResponse::from(command)))
}

pub async fn remove_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RemoveCommandQuery>,
) -> Result<StatusCode> {
    state.engine.remove(&id, query.archive).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn enqueue_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CommandResponse>)> {
    let command = state.engine.enqueue(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(CommandResponse::from(command))))
}

pub async fn restart_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CommandResponse>)> {
    let command = state.engine.restart(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(CommandResponse::from(command))))
}

pub async fn resume_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CommandResponse>)> {
    let command = state.engine.resume(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(CommandResponse::from(command))))
}

pub async fn stop_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.engine.stop(&id).await?;
    Ok(Json(serde_json::json!({
        "message": "Stop requested"
    })))
}

pub async fn get_command_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<CommandLogResponse>> {
    let kind = match query.kind {
        Some(raw) => raw.parse()?,
        None => LogKind::default(),
    };
    let data = state.engine.load_log(&id, kind).await?;
    Ok(Json(CommandLogResponse { id, kind, data }))
}

pub async fn get_check_reports(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportsResponse>> {
    let data = state.engine.load_check_reports(&id).await?;
    Ok(Json(ReportsResponse { id, data }))
}

pub async fn get_test_reports(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportsResponse>> {
    let data = state.engine.load_test_reports(&id).await?;
    Ok(Json(ReportsResponse { id, data }))
}

pub async fn download_archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let path = state.engine.resolve_archive(&id).await?;
    let bytes = tokio::fs::read(&path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.zip", id));

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    ))
}

pub async fn lock_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>> {
    let command = state.engine.lock(&id).await?;
    Ok(Json(CommandResponse::from(command)))
}

pub async fn unlock_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>> {
    let command = state.engine.unlock(&id).await?;
    Ok(Json(CommandResponse::from(command)))
}
