use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use ppg_monitor::SessionHandle;

#[derive(Clone)]
pub struct AppState {
    // At most one upstream stream per process; replaced on reconnect
    pub session: Arc<RwLock<Option<SessionHandle>>>,
    pub http: reqwest::Client,
}

impl AppState {
    /// `request_timeout` bounds every upstream HTTP call.
    pub fn new(request_timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            session: Arc::new(RwLock::new(None)),
            http,
        })
    }

    /// The current session, if its loop is still running.
    pub async fn active_session(&self) -> Option<SessionHandle> {
        let session = self.session.read().await;
        session.as_ref().filter(|s| s.is_active()).cloned()
    }
}
