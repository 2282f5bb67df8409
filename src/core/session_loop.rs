// Session actor: the single mutator of one StreamSession
//
// Every input (frames, ticks, HTTP commands, close) is serialized through
// one inbox. Acks leave through a bounded queue and are dropped when it is
// full so ingestion never waits on the socket.

use chrono::Utc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::constants::*;
use crate::core::error::{MonitorError, Result};
use crate::core::format::*;
use crate::core::session::{SessionSettings, SessionState, StreamSession};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub session: SessionSettings,
    pub tick_interval: Duration,
    pub ack_queue: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            ack_queue: ACK_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QualityView {
    pub state: SessionState,
    pub quality: QualitySnapshot,
    pub band: QualityBand,
    pub buffered: usize,
    pub rate_hz: Option<f64>,
    pub dropped_acks: u64,
}

pub enum SessionCommand {
    SetPaused(bool),
    Window {
        seconds: f64,
        reply: oneshot::Sender<Vec<Sample>>,
    },
    Samples {
        reply: oneshot::Sender<Vec<Sample>>,
    },
    Quality {
        reply: oneshot::Sender<QualityView>,
    },
    History {
        reply: oneshot::Sender<Vec<HistoryPoint>>,
    },
    ResetHistory,
}

pub enum SessionEvent {
    Frame {
        text: String,
        received_at: f64,
        at: Instant,
    },
    Tick,
    Command(SessionCommand),
    Closed(Option<String>),
}

/// Final accounting returned when the loop ends.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub state: SessionState,
    pub quality: QualitySnapshot,
    pub dropped_acks: u64,
    pub protocol_errors: u64,
}

/// Cheap, cloneable access to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    inbox: mpsc::Sender<SessionEvent>,
    notices: watch::Receiver<SnapshotNotice>,
    cancel: CancellationToken,
}

pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.inbox.is_closed()
    }

    /// Token cancelled when the session is torn down. Transport tasks bind
    /// to it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SnapshotNotice> {
        self.notices.clone()
    }

    /// Hand one received text frame to the session, stamped now.
    pub async fn deliver(&self, text: String) -> Result<()> {
        self.send(SessionEvent::Frame {
            text,
            received_at: epoch_seconds(),
            at: Instant::now(),
        })
        .await
    }

    pub async fn close(&self, reason: Option<String>) -> Result<()> {
        self.send(SessionEvent::Closed(reason)).await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        self.send(SessionEvent::Command(SessionCommand::SetPaused(paused)))
            .await
    }

    pub async fn reset_history(&self) -> Result<()> {
        self.send(SessionEvent::Command(SessionCommand::ResetHistory))
            .await
    }

    pub async fn window(&self, seconds: f64) -> Result<Vec<Sample>> {
        self.request(|reply| SessionCommand::Window { seconds, reply })
            .await
    }

    pub async fn samples(&self) -> Result<Vec<Sample>> {
        self.request(|reply| SessionCommand::Samples { reply }).await
    }

    pub async fn quality(&self) -> Result<QualityView> {
        self.request(|reply| SessionCommand::Quality { reply }).await
    }

    pub async fn history(&self) -> Result<Vec<HistoryPoint>> {
        self.request(|reply| SessionCommand::History { reply }).await
    }

    /// Tear down without waiting for the remote side.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, event: SessionEvent) -> Result<()> {
        self.inbox
            .send(event)
            .await
            .map_err(|_| MonitorError::SessionClosed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionEvent::Command(build(tx))).await?;
        rx.await.map_err(|_| MonitorError::SessionClosed)
    }
}

struct SessionLoop {
    session: StreamSession,
    inbox: mpsc::Receiver<SessionEvent>,
    acks: mpsc::Sender<Ack>,
    notices: watch::Sender<SnapshotNotice>,
    cancel: CancellationToken,
    dropped_acks: u64,
    protocol_errors: u64,
}

/// Start a session loop and its 1 Hz ticker.
///
/// Returns the handle, the receiving end of the ack queue (for the
/// transport writer) and the loop's join handle.
pub fn spawn_session(
    settings: LoopSettings,
) -> (SessionHandle, mpsc::Receiver<Ack>, JoinHandle<SessionSummary>) {
    let session = StreamSession::new(settings.session, Instant::now());
    let session_id = session.state().session_id;

    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let (ack_tx, ack_rx) = mpsc::channel(settings.ack_queue.max(1));
    let (notice_tx, notice_rx) = watch::channel(SnapshotNotice::default());
    let cancel = CancellationToken::new();

    spawn_ticker(inbox_tx.clone(), settings.tick_interval, cancel.clone());

    let actor = SessionLoop {
        session,
        inbox: inbox_rx,
        acks: ack_tx,
        notices: notice_tx,
        cancel: cancel.clone(),
        dropped_acks: 0,
        protocol_errors: 0,
    };
    let join = tokio::spawn(actor.run());

    let handle = SessionHandle {
        session_id,
        inbox: inbox_tx,
        notices: notice_rx,
        cancel,
    };

    (handle, ack_rx, join)
}

fn spawn_ticker(
    inbox: mpsc::Sender<SessionEvent>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match inbox.try_send(SessionEvent::Tick) {
                        Ok(()) => {}
                        // a tick is already queued behind a busy inbox
                        Err(TrySendError::Full(_)) => debug!("Tick skipped, inbox full"),
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }
        }
        debug!("Ticker stopped");
    })
}

impl SessionLoop {
    async fn run(mut self) -> SessionSummary {
        let session_id = self.session.state().session_id;
        info!("Session loop started: {}", session_id);

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.inbox.recv() => event,
            };

            match event {
                Some(SessionEvent::Frame { text, received_at, at }) => {
                    self.on_frame(&text, received_at, at);
                }
                Some(SessionEvent::Tick) => {
                    let snap = self.session.tick(Utc::now(), Instant::now());
                    debug!(
                        "Quality tick: loss {:.2}% latency {:.1} ms jitter {:.1} ms",
                        snap.loss_rate_pct, snap.latency_avg_ms, snap.jitter_ms
                    );
                }
                Some(SessionEvent::Command(cmd)) => self.on_command(cmd),
                Some(SessionEvent::Closed(reason)) => {
                    info!(
                        "Connection closed: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    break;
                }
                None => break,
            }
        }

        self.session.mark_disconnected();
        self.cancel.cancel();

        let quality = self.session.snapshot(Instant::now());
        self.notices.send_replace(self.session.notice(Instant::now()));

        info!(
            "Session loop finished: {} (received: {}, lost: {}, dropped acks: {})",
            session_id, quality.packets_received, quality.packets_lost, self.dropped_acks
        );

        SessionSummary {
            state: self.session.state().clone(),
            quality,
            dropped_acks: self.dropped_acks,
            protocol_errors: self.protocol_errors,
        }
    }

    fn on_frame(&mut self, text: &str, received_at: f64, at: Instant) {
        let ingested = match self.session.on_message(text, received_at, at) {
            Ok(Some(ingested)) => ingested,
            Ok(None) => return,
            Err(e) => {
                self.protocol_errors += 1;
                warn!("Dropping frame: {}", e);
                return;
            }
        };

        if ingested.notify {
            self.notices.send_replace(self.session.notice(at));
        }

        if let Some(ack) = ingested.ack {
            match self.acks.try_send(ack) {
                Ok(()) => {}
                Err(TrySendError::Full(ack)) => {
                    self.dropped_acks += 1;
                    if self.dropped_acks.is_power_of_two() {
                        warn!(
                            "Ack queue full, dropped ack {} ({} dropped so far)",
                            ack.seq, self.dropped_acks
                        );
                    }
                }
                Err(TrySendError::Closed(ack)) => {
                    debug!("Ack writer gone, ack {} discarded", ack.seq);
                }
            }
        }
    }

    fn on_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SetPaused(paused) => self.session.set_paused(paused),
            SessionCommand::ResetHistory => {
                self.session.reset_history();
                info!("Quality history reset");
            }
            SessionCommand::Window { seconds, reply } => {
                let _ = reply.send(self.session.window_view(seconds));
            }
            SessionCommand::Samples { reply } => {
                let _ = reply.send(self.session.buffer().iter().copied().collect());
            }
            SessionCommand::Quality { reply } => {
                let quality = self.session.snapshot(Instant::now());
                let view = QualityView {
                    state: self.session.state().clone(),
                    band: quality.band(),
                    quality,
                    buffered: self.session.buffer().len(),
                    rate_hz: self.session.buffer().effective_rate_hz(),
                    dropped_acks: self.dropped_acks,
                };
                let _ = reply.send(view);
            }
            SessionCommand::History { reply } => {
                let _ = reply.send(self.session.history());
            }
        }
    }
}

impl Drop for SessionLoop {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            error!("Session loop dropped while active, cancelling tasks");
            self.cancel.cancel();
        }
    }
}
