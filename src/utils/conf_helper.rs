use std::path::Path;
use std::sync::OnceLock;
use tokio::fs;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::models::monitor_model::MonitorConfig;
use ppg_monitor::{MonitorError, Result};

static CONFIG_CACHE: OnceLock<MonitorConfig> = OnceLock::new();
static UPSTREAM_URL: OnceLock<String> = OnceLock::new();

const DEFAULT_CONFIG_PATH: &str = "monitor.json";
const CONFIG_PATH_VAR: &str = "PPG_MONITOR_CONFIG";
const PASSWORD_VAR: &str = "PPG_MONITOR_PASSWORD";

/// Parse a monitor config file. `password` replaces the stream password
/// when set, so secrets can stay out of the file.
pub async fn load_config(path: &Path, password: Option<String>) -> Result<MonitorConfig> {
    let data = fs::read_to_string(path)
        .await
        .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))?;

    let mut config: MonitorConfig = serde_json::from_str(&data)
        .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))?;

    if let Some(password) = password {
        config.stream.password = password;
    }
    if config.stream.password.is_empty() {
        warn!("No stream password configured, /auth will likely reject us");
    }

    Ok(config)
}

/// `host:port` of the upstream sample server.
pub fn upstream_address(config: &MonitorConfig) -> String {
    format!("{}:{}", config.connection.target, config.connection.target_port)
}

/// Load the config, bind the HTTP listener and cache both for the process.
///
/// A port of 0 binds an ephemeral port, which is written back into the
/// cached config.
pub async fn init_config_and_bind() -> Result<TcpListener> {
    let file_path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = load_config(Path::new(&file_path), std::env::var(PASSWORD_VAR).ok()).await?;

    let listener =
        TcpListener::bind((config.connection.ip.as_str(), config.connection.port)).await?;
    config.connection.port = listener.local_addr()?.port();

    UPSTREAM_URL
        .set(upstream_address(&config))
        .map_err(|_| MonitorError::Config("upstream address already initialized".to_string()))?;

    info!(
        "Config loaded from {} (listening on port {})",
        file_path, config.connection.port
    );

    CONFIG_CACHE
        .set(config)
        .map_err(|_| MonitorError::Config("config already initialized".to_string()))?;

    Ok(listener)
}

pub fn get_cached_config() -> &'static MonitorConfig {
    CONFIG_CACHE.get().expect("Config not initialized")
}

pub fn get_upstream_url() -> &'static String {
    UPSTREAM_URL.get().expect("Upstream URL not initialized")
}
