use super::handlers::{command, health};
use super::middleware::cors::add_cors;
use crate::services::ExecutionEngine;
use axum::{
    Router,
    routing::{get, put},
};

#[derive(Clone)]
pub struct AppState {
    pub engine: ExecutionEngine,
}

pub fn create_router(engine: ExecutionEngine) -> Router {
    let state = AppState { engine };

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Command records
        .route(
            "/api/commands",
            get(command::list_commands).post(command::create_command),
        )
        .route(
            "/api/commands/{id}",
            get(command::get_command)
                .put(command::update_command)
                .delete(command::remove_command),
        )
        .route("/api/commands/{id}/log", get(command::get_command_log))
        .route(
            "/api/commands/{id}/check_reports",
            get(command::get_check_reports),
        )
        .route("/api/commands/{id}/test_reports", get(command::get_test_reports))
        .route("/api/commands/{id}/archive", get(command::download_archive))
        // Run control
        .route("/api/commands/{id}/enqueue", put(command::enqueue_command))
        .route("/api/commands/{id}/restart", put(command::restart_command))
        .route("/api/commands/{id}/resume", put(command::resume_command))
        .route("/api/commands/{id}/stop", put(command::stop_command))
        .route("/api/commands/{id}/lock", put(command::lock_command))
        .route("/api/commands/{id}/unlock", put(command::unlock_command))
        .with_state(state);

    add_cors(api_routes)
}
