use axum::{
    routing::get,
    Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
    extract::State,
};

use tracing::{debug, error};
use serde::Serialize;

use crate::state::app_state::AppState;


pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(info_check))
        .route("/stop", get(stop_process))
        .with_state(state)
}

pub async fn info_check() -> Response {
    let config = crate::utils::conf_helper::get_cached_config();

    debug!("{} requested", config.name);
    Json(config).into_response()
}


async fn health_check(State(state): State<AppState>) -> Response {
    let session = state.active_session().await;

    Json(HealthStatus {
        status: "ok".to_owned(),
        session_active: session.is_some(),
        session_id: session.map(|s| s.session_id().to_string()),
    })
    .into_response()
}


async fn stop_process(State(state): State<AppState>) -> impl IntoResponse {
    error!("Stop endpoint called, shutting down process");

    if let Some(session) = state.active_session().await {
        session.shutdown();
    }

    // short delay so the session teardown and log lines flush
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        std::process::exit(0);
    });

    StatusCode::OK
}


#[derive(Serialize)]
pub struct HealthStatus {
    status: String,
    session_active: bool,
    session_id: Option<String>,
}
