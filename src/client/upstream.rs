use serde::{Deserialize, Serialize};
use tracing::{info, warn, error, debug};
use reqwest::{Client, StatusCode};
use crate::utils::conf_helper;
use crate::state::app_state::AppState;

use ppg_monitor::core::format::RemoteQualityStats;
use ppg_monitor::{connect_stream, handle_ws_stream, spawn_session, MonitorError, Result, SessionHandle};

#[derive(Serialize)]
pub struct AuthRequest<'a> {
    pub password: &'a str,
}

#[derive(Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub success: bool,
    pub token: String,
}

use tokio::time::{sleep, timeout, Duration};

/// Exchange the configured password for a stream token.
pub async fn authenticate(client: &Client) -> Result<String> {
    let config = conf_helper::get_cached_config();
    let auth_url = format!("http://{}/auth", conf_helper::get_upstream_url());

    info!("Authenticating against {}", auth_url);

    let resp = client
        .post(&auth_url)
        .json(&AuthRequest { password: &config.stream.password })
        .send()
        .await
        .map_err(|e| {
            error!("Authentication request failed: {}", e);
            e
        })?;

    if resp.status() == StatusCode::UNAUTHORIZED {
        return Err(MonitorError::AuthRejected("wrong password".to_string()));
    }

    let body: AuthResponse = resp.error_for_status()?.json().await?;
    issued_token(body)
}

fn issued_token(body: AuthResponse) -> Result<String> {
    if !body.success || body.token.is_empty() {
        return Err(MonitorError::AuthRejected("no token issued".to_string()));
    }
    Ok(body.token)
}

pub async fn fetch_quality_stats(client: &Client) -> Result<RemoteQualityStats> {
    let stats_url = format!("http://{}/quality/stats", conf_helper::get_upstream_url());

    let stats = client
        .get(&stats_url)
        .send()
        .await?
        .error_for_status()?
        .json::<RemoteQualityStats>()
        .await?;

    Ok(stats)
}

/// Authenticate, open the stream and start a fresh session.
///
/// The slot lock is only taken once the socket is open, so a stalled
/// upstream never blocks readers of the current session. No automatic
/// reconnect: a dropped stream stays down until this is called again.
pub async fn connect_session(state: &AppState) -> Result<SessionHandle> {
    let config = conf_helper::get_cached_config();
    let connect_timeout = Duration::from_secs(config.stream.connect_timeout_secs.max(1));

    let token = authenticate(&state.http).await?;

    let stream_url = format!("ws://{}/ws?token={}", conf_helper::get_upstream_url(), token);
    let socket = timeout(connect_timeout, connect_stream(&stream_url))
        .await
        .map_err(|_| MonitorError::Timeout(format!("stream connect after {:?}", connect_timeout)))??;

    let mut slot = state.session.write().await;
    // another connect may have won while we were dialing; the socket drops here
    claim_slot(&mut slot)?;

    let (handle, acks, join) = spawn_session(config.stream.loop_settings());
    tokio::spawn(handle_ws_stream(socket, handle.clone(), acks));

    tokio::spawn(async move {
        match join.await {
            Ok(summary) => info!(
                "Session {} ended: received {}, lost {} ({:.2}%)",
                summary.state.session_id,
                summary.quality.packets_received,
                summary.quality.packets_lost,
                summary.quality.loss_rate_pct
            ),
            Err(e) => error!("Session task failed: {}", e),
        }
    });

    info!("Session {} streaming from {}", handle.session_id(), conf_helper::get_upstream_url());
    *slot = Some(handle.clone());
    Ok(handle)
}

/// Refuse while a live session holds the slot; clear a finished one.
fn claim_slot(slot: &mut Option<SessionHandle>) -> Result<()> {
    if let Some(current) = slot.as_ref() {
        if current.is_active() {
            warn!("Session {} already streaming, dropping new stream", current.session_id());
            return Err(MonitorError::AlreadyConnected(current.session_id()));
        }
    }
    if let Some(stale) = slot.take() {
        debug!("Replacing finished session {}", stale.session_id());
    }
    Ok(())
}

/// Periodically compare the upstream's view of this client with ours.
pub async fn start_quality_watch(state: AppState) {
    let config = conf_helper::get_cached_config();
    let period = Duration::from_secs(config.stream.remote_poll_secs.max(1));

    info!("Quality watch started (every {:?})", period);

    loop {
        sleep(period).await;

        let Some(session) = state.active_session().await else {
            continue;
        };

        let local = match session.quality().await {
            Ok(view) => view,
            Err(_) => continue,
        };
        let Some(client_id) = local.state.client_id.clone() else {
            continue;
        };

        match fetch_quality_stats(&state.http).await {
            Ok(stats) => match stats.clients.get(&client_id) {
                // loss and latency only: upstream jitter is a stdev, ours is the mean
                // absolute consecutive difference, so they are not compared
                Some(remote) => debug!(
                    "Quality {}: local loss {:.2}% / upstream {:.2}%, local latency {:.2} ms / upstream {:.2} ms",
                    client_id,
                    local.quality.loss_rate_pct,
                    remote.loss_rate,
                    local.quality.latency_avg_ms,
                    remote.latency_avg
                ),
                None => warn!("Upstream does not list client {}", client_id),
            },
            Err(e) => warn!("Quality polling failed: {}", e),
        }
    }
}
