use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::BytesMut;
use chat_control::{ConnectionHandle, Manager};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Instant};
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatcher::{dispatch, push_payload};
use crate::frame::{self, Frame, FrameType};
use crate::session::Session;

const READ_CHUNK: usize = 8 * 1024;

/// One outbound frame queued for the write-strand. `request_id` is `0` for
/// server-initiated pushes, matching spec.md §4.12's framing rule.
struct OutFrame {
    request_id: i64,
    frame_type: FrameType,
    payload: Vec<u8>,
}

/// Drives one accepted TCP connection end to end: TLS handshake, connection
/// registration, the read loop (frame assembly, dispatch, heartbeat-flood
/// and inactivity watchdogs), and a single writer task that serializes every
/// outbound frame — both dispatch replies and asynchronous pushes forwarded
/// from the user's `OutboundReceiver`. Grounded on
/// `Duocast-TSOD/server/gateway/src/gateway.rs`'s `handle_conn`, adapted
/// from one bidirectional QUIC stream to one TLS-over-TCP socket.
pub async fn handle(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    manager: Arc<Manager>,
    config: Arc<Config>,
) -> Result<()> {
    let tls_stream = acceptor.accept(stream).await.context("TLS handshake")?;
    let handle = ConnectionHandle::allocate();
    manager.register_connection(handle);
    info!(%peer_addr, %handle, "connection established");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutFrame>();
    let (push_tx, mut push_rx) = chat_control::events::channel();
    let session = Arc::new(Session::new(manager.clone(), handle, push_tx));

    let (mut read_half, mut write_half) = tokio::io::split(tls_stream);

    // Single writer task: both dispatch replies and async pushes funnel
    // through `out_tx` so exactly one task ever calls `write_all`.
    let writer = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            let frame = Frame::new(out.request_id, out.frame_type, BytesMut::from(&out.payload[..]));
            let wire = frame::encode(&frame);
            if let Err(e) = write_half.write_all(&wire).await {
                warn!(%handle, "writer task exiting: {e:#}");
                break;
            }
        }
    });

    // Bridges `User::notify_all` pushes (request_id 0) onto the same
    // write-strand as dispatch replies.
    let push_out_tx = out_tx.clone();
    let push_bridge = tokio::spawn(async move {
        while let Some(event) = push_rx.recv().await {
            let payload = serde_json::to_vec(&push_payload(&event)).unwrap_or_default();
            if push_out_tx
                .send(OutFrame {
                    request_id: 0,
                    frame_type: FrameType::Text,
                    payload,
                })
                .is_err()
            {
                break;
            }
        }
    });

    let result = read_loop(&mut read_half, &session, &out_tx, &config).await;

    drop(out_tx);
    let _ = writer.await;
    push_bridge.abort();
    manager.detach_connection(handle);
    info!(%peer_addr, %handle, "connection closed");
    result
}

async fn read_loop(
    read_half: &mut (impl tokio::io::AsyncRead + Unpin),
    session: &Arc<Session>,
    out_tx: &mpsc::UnboundedSender<OutFrame>,
    config: &Config,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let deadline = Duration::from_secs(config.inactivity_deadline_secs);
    let heartbeat_window = Duration::from_secs(config.heartbeat_window_secs);
    let mut heartbeat_count = 0u32;
    let mut heartbeat_window_start = Instant::now();

    loop {
        while let Some(frame) = frame::try_decode(&mut buf)? {
            match frame.frame_type {
                FrameType::HeartBeat => {
                    let now = Instant::now();
                    if now.duration_since(heartbeat_window_start) > heartbeat_window {
                        heartbeat_window_start = now;
                        heartbeat_count = 0;
                    }
                    heartbeat_count += 1;
                    if heartbeat_count > config.heartbeat_limit {
                        anyhow::bail!("heartbeat flood: {heartbeat_count} in one window");
                    }
                    let _ = out_tx.send(OutFrame {
                        request_id: frame.request_id,
                        frame_type: FrameType::HeartBeat,
                        payload: Vec::new(),
                    });
                }
                FrameType::Text => {
                    let response = handle_text_frame(session, &frame.payload);
                    let payload = serde_json::to_vec(&response).unwrap_or_default();
                    if out_tx
                        .send(OutFrame {
                            request_id: frame.request_id,
                            frame_type: FrameType::Text,
                            payload,
                        })
                        .is_err()
                    {
                        return Ok(());
                    }
                }
                FrameType::Binary | FrameType::FileStream | FrameType::Unknown => {
                    // spec.md §9 non-goal: file transfer and raw binary frames
                    // are accepted on the wire but not interpreted.
                }
            }
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = timeout(deadline, read_half.read(&mut chunk))
            .await
            .context("inactivity deadline exceeded")?
            .context("socket read failed")?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn handle_text_frame(session: &Arc<Session>, payload: &[u8]) -> serde_json::Value {
    let parsed: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => return serde_json::json!({ "state": "error", "message": format!("bad JSON: {e}") }),
    };
    let function = match parsed.get("function").and_then(|v| v.as_str()) {
        Some(f) => f,
        None => return serde_json::json!({ "state": "error", "message": "missing \"function\"" }),
    };
    let empty = serde_json::json!({});
    let parameters = parsed.get("parameters").unwrap_or(&empty);
    dispatch(session, function, parameters)
}

/// Background task: periodically evicts idle rate-limiter buckets.
pub async fn run_rate_limiter_sweep(limiter: Arc<crate::rate_limiter::RateLimiter>, sweep: Duration, idle_for: Duration) {
    let mut ticker = interval(sweep);
    loop {
        ticker.tick().await;
        limiter.sweep_idle(idle_for);
    }
}

/// Background task: periodically drops messages older than the retention
/// window from every room.
pub async fn run_retention_sweep(manager: Arc<Manager>, sweep: Duration, retention_days: i64) {
    let mut ticker = interval(sweep);
    loop {
        ticker.tick().await;
        let cutoff_ms = Manager::now_ms() - retention_days * 24 * 60 * 60 * 1000;
        manager.sweep_message_retention(cutoff_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_control::InMemoryDataManager;

    fn new_session() -> Arc<Session> {
        let manager = Arc::new(Manager::new(Box::new(InMemoryDataManager)));
        let (tx, _rx) = chat_control::events::channel();
        Arc::new(Session::new(manager, ConnectionHandle::allocate(), tx))
    }

    #[test]
    fn malformed_json_is_reported_as_bad_json() {
        let session = new_session();
        let resp = handle_text_frame(&session, b"not json");
        assert_eq!(resp["state"], "error");
        assert!(resp["message"].as_str().unwrap().starts_with("bad JSON"));
    }

    #[test]
    fn missing_function_field_is_reported() {
        let session = new_session();
        let resp = handle_text_frame(&session, br#"{"parameters": {}}"#);
        assert_eq!(resp["message"], "missing \"function\"");
    }

    #[test]
    fn valid_envelope_reaches_the_dispatcher() {
        let session = new_session();
        let resp = handle_text_frame(&session, br#"{"function": "has_user", "parameters": {"user_id": 1}}"#);
        assert_eq!(resp["state"], "success");
        assert_eq!(resp["exists"], false);
    }
}
