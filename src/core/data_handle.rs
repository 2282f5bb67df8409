use axum::extract::ws::{Message as LiveMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::core::error::Result;
use crate::core::format::{Ack, SnapshotNotice};
use crate::core::session_loop::SessionHandle;

pub type StreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the sample stream at `url` (`ws://host:port/ws?token=...`).
pub async fn connect_stream(url: &str) -> Result<StreamSocket> {
    let (socket, response) = tokio_tungstenite::connect_async(url).await?;
    info!("Stream connected (HTTP {})", response.status());
    Ok(socket)
}

/// Pump one upstream socket into a session until either side ends.
///
/// Text frames go to the session inbox; acks from `acks` go back out.
/// Both directions stop when the session token is cancelled.
pub async fn handle_ws_stream<S>(
    socket: WebSocketStream<S>,
    session: SessionHandle,
    mut acks: mpsc::Receiver<Ack>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = socket.split();
    let cancel = session.cancel_token();

    // 🔁 ack writer
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            let ack = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                ack = acks.recv() => match ack {
                    Some(ack) => ack,
                    None => break,
                },
            };

            let json = match serde_json::to_string(&ack) {
                Ok(j) => j,
                Err(e) => {
                    error!("ack serialize error: {}", e);
                    continue;
                }
            };

            if let Err(e) = sink.send(Message::Text(json.into())).await {
                warn!("ack send failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
        debug!("ack writer stopped");
    });

    // 📥 frame reader
    let reason = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break Some("session cancelled".to_string()),
            next = stream.next() => next,
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("dropping non-UTF-8 binary frame ({} bytes)", bytes.len());
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                break frame.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!("stream read failed: {}", e);
                break Some(e.to_string());
            }
            None => break Some("stream ended".to_string()),
        };

        if session.deliver(text).await.is_err() {
            break Some("session loop gone".to_string());
        }
    };

    // session may already be gone; teardown is idempotent
    let _ = session.close(reason).await;
    session.shutdown();
    let _ = writer.await;

    info!("stream handler finished: {}", session.session_id());
}

#[derive(Serialize)]
struct LivePayload<'a> {
    #[serde(flatten)]
    notice: &'a SnapshotNotice,
    seq: u64,
    end_flag: bool,
}

/// Forward throttled snapshot notices to a render client over `/live`.
pub async fn handle_ws_live(mut socket: WebSocket, mut notices: watch::Receiver<SnapshotNotice>) {
    info!("live feed started");

    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            changed = notices.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(LiveMessage::Close(_))) | Some(Err(_)) | None => {
                    info!("live client left after {} notices", seq);
                    return;
                }
                Some(Ok(_)) => continue,
            },
        }

        let json = {
            let notice = notices.borrow_and_update();
            let payload = LivePayload {
                notice: &*notice,
                seq,
                end_flag: false,
            };
            match serde_json::to_string(&payload) {
                Ok(j) => j,
                Err(e) => {
                    error!("json serialize error: {}", e);
                    return;
                }
            }
        };

        if let Err(e) = socket.send(LiveMessage::Text(json.into())).await {
            warn!("live send failed: {}", e);
            return;
        }

        seq += 1;
    }

    // 🔚 END FLAG
    let last = notices.borrow().clone();
    let end_payload = LivePayload {
        notice: &last,
        seq,
        end_flag: true,
    };

    if let Ok(json) = serde_json::to_string(&end_payload) {
        let _ = socket.send(LiveMessage::Text(json.into())).await;
    }

    info!("live feed finished after {} notices", seq);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session_loop::{epoch_seconds, spawn_session, LoopSettings};
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_stream_acks_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // stand-in for the upstream sample server
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            ws.send(Message::Text(r#"{"type":"config","client_id":"client_0"}"#.into()))
                .await
                .unwrap();
            for seq in [1u64, 2, 4] {
                let frame = format!(
                    r#"{{"seq":{},"timestamp":{},"raw":1,"filtered":1,"server_time":{}}}"#,
                    seq,
                    seq,
                    epoch_seconds()
                );
                ws.send(Message::Text(frame.into())).await.unwrap();
            }

            let mut acked = Vec::new();
            while acked.len() < 3 {
                match ws.next().await {
                    Some(Ok(Message::Text(t))) => {
                        let ack: Ack = serde_json::from_str(t.as_str()).unwrap();
                        acked.push(ack.seq);
                    }
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
            let _ = ws.close(None).await;
            acked
        });

        let socket = connect_stream(&format!("ws://{}/ws?token=test", addr))
            .await
            .unwrap();
        let (handle, acks, join) = spawn_session(LoopSettings {
            tick_interval: Duration::from_secs(3600),
            ..LoopSettings::default()
        });
        let pump = tokio::spawn(handle_ws_stream(socket, handle.clone(), acks));

        assert_eq!(server.await.unwrap(), vec![1, 2, 4]);

        let summary = join.await.unwrap();
        pump.await.unwrap();

        assert_eq!(summary.state.packets_received, 3);
        assert_eq!(summary.state.packets_lost, 1);
        assert_eq!(summary.state.client_id.as_deref(), Some("client_0"));
        assert!(!summary.state.connected);
        assert!(!handle.is_active());
    }

    #[tokio::test]
    async fn test_live_feed_ends_when_client_closes() {
        use axum::extract::ws::WebSocketUpgrade;
        use axum::routing::get;
        use axum::Router;

        // sender kept alive and silent, as on a paused stream
        let (_notice_tx, notice_rx) = watch::channel(SnapshotNotice::default());
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

        let app = Router::new().route(
            "/live",
            get(move |ws: WebSocketUpgrade| {
                let notices = notice_rx.clone();
                let done = done_tx.clone();
                async move {
                    ws.on_upgrade(move |socket| async move {
                        handle_ws_live(socket, notices).await;
                        let _ = done.send(()).await;
                    })
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}/live", addr))
            .await
            .unwrap();
        client.close(None).await.unwrap();

        let finished = tokio::time::timeout(Duration::from_secs(2), done_rx.recv()).await;
        assert_eq!(finished.unwrap(), Some(()));
    }
}
