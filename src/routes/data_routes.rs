use axum::{
    routing::{get, post},
    Router,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
    extract::{
        Query,
        State,
        ws::WebSocketUpgrade,
    },
};

use chrono::Utc;
use tracing::{info, debug, error, warn};
use serde::{Serialize, Deserialize};

use crate::client::upstream;
use crate::state::app_state::AppState;
use crate::utils::conf_helper;
use ppg_monitor::core::compression::gzip;
use ppg_monitor::core::export::{samples_to_csv, QualityReport};
use ppg_monitor::{handle_ws_live, MonitorError, SessionHandle};

#[derive(Serialize)]
pub struct ConnectResponse {
    pub session_id: String,
}

#[derive(Deserialize, Debug)]
pub struct PauseRequest {
    pub paused: bool,
}

#[derive(Deserialize, Debug)]
pub struct WindowQuery {
    pub seconds: Option<f64>,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}


/// =======================
/// ROUTER
/// =======================

pub fn data_routes(state: AppState) -> Router {
    Router::new()
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/pause", post(set_paused))
        .route("/window", get(window))
        .route("/quality", get(quality))
        .route("/quality/history", get(history))
        .route("/quality/history/reset", post(reset_history))
        .route("/quality/report", get(report))
        .route("/quality/remote", get(remote_quality))
        .route("/export/csv", get(export_csv))
        .route("/export/csv.gz", get(export_csv_gz))
        .route("/live", get(ws_live))
        .with_state(state)
}


fn error_response(e: MonitorError) -> Response {
    let status = match &e {
        MonitorError::NotConnected | MonitorError::SessionClosed => StatusCode::SERVICE_UNAVAILABLE,
        MonitorError::AuthRejected(_) => StatusCode::UNAUTHORIZED,
        MonitorError::AlreadyConnected(_) => StatusCode::CONFLICT,
        MonitorError::Http(_) | MonitorError::WebSocket(_) => StatusCode::BAD_GATEWAY,
        MonitorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(ErrorBody { error: e.to_string() })).into_response()
}

async fn require_session(state: &AppState) -> Result<SessionHandle, Response> {
    state
        .active_session()
        .await
        .ok_or_else(|| error_response(MonitorError::NotConnected))
}


/// =======================
/// HANDLERS
/// =======================

async fn connect(State(state): State<AppState>) -> Response {
    if let Some(active) = state.active_session().await {
        warn!("Connect requested while session {} is active", active.session_id());
        return (
            StatusCode::CONFLICT,
            Json(ConnectResponse { session_id: active.session_id().to_string() }),
        )
            .into_response();
    }

    match upstream::connect_session(&state).await {
        Ok(handle) => Json(ConnectResponse {
            session_id: handle.session_id().to_string(),
        })
        .into_response(),
        Err(e) => {
            error!("Connect failed: {}", e);
            error_response(e)
        }
    }
}

async fn disconnect(State(state): State<AppState>) -> Response {
    match state.active_session().await {
        Some(session) => {
            info!("Disconnect requested for session {}", session.session_id());
            session.shutdown();
            StatusCode::OK.into_response()
        }
        None => error_response(MonitorError::NotConnected),
    }
}

async fn set_paused(
    State(state): State<AppState>,
    Json(request): Json<PauseRequest>,
) -> Response {
    let session = match require_session(&state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match session.set_paused(request.paused).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn window(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Response {
    let session = match require_session(&state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let seconds = query
        .seconds
        .filter(|s| s.is_finite() && *s >= 0.0)
        .unwrap_or(conf_helper::get_cached_config().stream.window_seconds);

    debug!("Window requested: {}s", seconds);

    match session.window(seconds).await {
        Ok(samples) => Json(samples).into_response(),
        Err(e) => error_response(e),
    }
}

async fn quality(State(state): State<AppState>) -> Response {
    let session = match require_session(&state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match session.quality().await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

async fn history(State(state): State<AppState>) -> Response {
    let session = match require_session(&state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match session.history().await {
        Ok(points) => Json(points).into_response(),
        Err(e) => error_response(e),
    }
}

async fn reset_history(State(state): State<AppState>) -> Response {
    let session = match require_session(&state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match session.reset_history().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn report(State(state): State<AppState>) -> Response {
    let session = match require_session(&state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let view = match session.quality().await {
        Ok(v) => v,
        Err(e) => return error_response(e),
    };
    let points = match session.history().await {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };

    Json(QualityReport::build(
        view.state.client_id,
        Utc::now(),
        &points,
        &view.quality,
    ))
    .into_response()
}

async fn remote_quality(State(state): State<AppState>) -> Response {
    match upstream::fetch_quality_stats(&state.http).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            warn!("Remote quality request failed: {}", e);
            error_response(e)
        }
    }
}

async fn export_csv(State(state): State<AppState>) -> Response {
    let session = match require_session(&state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match session.samples().await {
        Ok(samples) => {
            info!("Exporting {} samples as CSV", samples.len());
            (
                [
                    (header::CONTENT_TYPE, "text/csv"),
                    (header::CONTENT_DISPOSITION, "attachment; filename=\"ppg_data.csv\""),
                ],
                samples_to_csv(&samples),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn export_csv_gz(State(state): State<AppState>) -> Response {
    let session = match require_session(&state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let samples = match session.samples().await {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };

    match gzip(samples_to_csv(&samples).as_bytes()) {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, "application/gzip"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"ppg_data.csv.gz\""),
            ],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("CSV compression failed: {}", e);
            error_response(e)
        }
    }
}

async fn ws_live(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let session = match require_session(&state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let notices = session.subscribe();
    ws.on_upgrade(move |socket| handle_ws_live(socket, notices))
}
