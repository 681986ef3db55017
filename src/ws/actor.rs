//! Actor-per-connection: one task pair per authenticated socket.
//!
//! The socket is split into reader and writer halves. The writer task owns
//! the sink and drains two channels: the connection's outbound channel (the
//! send capability the registry holds) and a small control channel for
//! keepalive frames. The reader loop dispatches client events into the chat
//! service. Every exit path funnels into exactly one deregister.

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant};

use crate::chat::service::SubmitError;
use crate::chat::{Outbound, UserRef};
use crate::state::AppState;
use crate::ws::{ClientEvent, ServerEvent};

/// Server sends a WebSocket ping this often. Detects abrupt disconnects that
/// never produce a close frame, so registry entries cannot leak.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A ping left unanswered this long closes the connection.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code sent when the peer stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Keepalive traffic from the reader to the writer.
enum Control {
    /// Client pinged us; echo the payload back as a pong.
    PongReply(Bytes),
    /// Client answered our ping.
    PongReceived,
}

/// Run one authenticated connection to completion.
pub async fn run_connection(socket: WebSocket, state: AppState, user: UserRef) {
    let (ws_sink, ws_stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<Control>();

    // Registered before the first frame is read: sends racing with connection
    // setup reach this session as soon as the call returns.
    let conn = state.chat.connection_opened(&user, tx.clone());

    let mut writer_handle = tokio::spawn(writer_task(ws_sink, rx, ctrl_rx));

    // The reader can stay parked in `next()` forever against a peer that ACKs
    // TCP but never completes the close handshake, so writer exit (pong
    // timeout, sink failure, forced close) must also end the connection.
    tokio::select! {
        _ = read_loop(ws_stream, &state, &user, &tx, &ctrl_tx) => {}
        _ = &mut writer_handle => {}
    }

    // Unconditional, exactly once per connection, on every termination path.
    state.chat.connection_closed(&conn);
    writer_handle.abort();
}

/// Reader loop: runs until the client closes, the transport errors, or the
/// stream ends.
async fn read_loop(
    mut ws_stream: SplitStream<WebSocket>,
    state: &AppState,
    user: &UserRef,
    tx: &mpsc::UnboundedSender<Outbound>,
    ctrl_tx: &mpsc::UnboundedSender<Control>,
) {
    loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::SendMessage { recipient, content }) => {
                    handle_send(state, user, tx, &recipient, &content).await;
                }
                Err(e) => {
                    tracing::debug!(
                        user_id = user.id,
                        error = %e,
                        "unrecognized client event ignored"
                    );
                }
            },
            Some(Ok(Message::Binary(_))) => {
                tracing::debug!(user_id = user.id, "binary frame ignored (protocol is JSON)");
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = ctrl_tx.send(Control::PongReply(data));
            }
            Some(Ok(Message::Pong(_))) => {
                let _ = ctrl_tx.send(Control::PongReceived);
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(user_id = user.id, reason = ?frame, "client initiated close");
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(user_id = user.id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id = user.id, "WebSocket stream ended");
                break;
            }
        }
    }
}

/// Dispatch one send request into the submit pipeline. Failures go back to
/// this session only; storage faults are the only ones logged as errors.
async fn handle_send(
    state: &AppState,
    user: &UserRef,
    tx: &mpsc::UnboundedSender<Outbound>,
    recipient: &str,
    content: &str,
) {
    match state.chat.submit_message(user, recipient, content).await {
        Ok(receipt) => {
            tracing::debug!(
                user_id = user.id,
                message_id = receipt.message_id,
                "message submitted"
            );
        }
        Err(err) => {
            match &err {
                SubmitError::Storage(e) => {
                    tracing::error!(user_id = user.id, error = %e, "message submit failed in store");
                }
                _ => {
                    tracing::debug!(user_id = user.id, error = %err, "message submit rejected");
                }
            }
            let _ = tx.send(Outbound::SendFailed {
                reason: err.to_string(),
            });
        }
    }
}

/// Writer task: owns the sink. Serializes outbound chat events, answers
/// client pings, and runs the server-side keepalive. Exits on sink failure,
/// channel closure, an explicit Close, or a missed pong deadline.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut ctrl_rx: mpsc::UnboundedReceiver<Control>,
) {
    let mut ping_timer = interval(PING_INTERVAL);
    // Skip the first immediate tick
    ping_timer.tick().await;
    // Set when a ping is in flight; cleared by the pong.
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            out = rx.recv() => {
                let Some(out) = out else { break };
                match out {
                    Outbound::Delivery(payload) => {
                        let event = ServerEvent::NewMessage { message: payload };
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    Outbound::SendFailed { reason } => {
                        let event = ServerEvent::MessageError { error: reason };
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
            ctrl = ctrl_rx.recv() => {
                match ctrl {
                    Some(Control::PongReply(data)) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Control::PongReceived) => {
                        pong_deadline = None;
                    }
                    None => break,
                }
            }
            _ = ping_timer.tick() => {
                if sink.send(Message::Ping(vec![1, 2, 3, 4].into())).await.is_err() {
                    break;
                }
                pong_deadline = Some(Instant::now() + PONG_TIMEOUT);
            }
            _ = wait_for(pong_deadline) => {
                // No pong within the deadline — the peer is gone.
                tracing::warn!("pong timeout, closing connection");
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "Pong timeout".into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

/// Sleep until the deadline, or forever when none is set.
async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
