//! Control channel: one WebSocket per client session.
//!
//! Owns the session's lifetime. On upgrade it registers a session, starts its
//! pipeline, and pumps frames both ways; when either side stops, the session
//! is removed and the pipeline is cancelled.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Error;
use crate::server::ControlState;
use crate::streaming::{
    control_channel, ClientId, ClientMessage, ClientPipeline, ClientSession, ControlSender,
    Fetcher, ServerMessage, MAX_INBOUND_FRAME,
};
use crate::tick::SettingsHandle;

pub fn router<F: Fetcher>(state: ControlState<F>) -> Router {
    Router::new()
        .route("/", get(control_ws::<F>))
        .route("/control", get(control_ws::<F>))
        .with_state(state)
}

async fn control_ws<F: Fetcher>(
    ws: WebSocketUpgrade,
    State(state): State<ControlState<F>>,
) -> Response {
    // Oversized frames are refused by the transport before they are buffered.
    ws.max_message_size(MAX_INBOUND_FRAME)
        .max_frame_size(MAX_INBOUND_FRAME)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<F: Fetcher>(socket: WebSocket, state: ControlState<F>) {
    let session = state.registry.register(state.profile.clone());
    let client_id = session.id();
    tracing::info!(%client_id, clients = state.registry.len(), "client connected");

    let (control_tx, mut control_rx) = control_channel();
    queue_reply(&control_tx, client_id, ServerMessage::hello(client_id, session.profile()));

    let pipeline = ClientPipeline::new(
        Arc::clone(&session),
        Arc::clone(&state.fetcher),
        state.ticks.subscribe(),
        control_tx.clone(),
    )
    .with_stall_timeout(state.stall_timeout);
    let pipeline = tokio::spawn(pipeline.run());

    let (mut ws_tx, mut ws_rx) = socket.split();
    let cancel = session.cancellation().clone();

    let writer = async {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = control_rx.recv() => msg,
            };
            let Some(msg) = msg else { break };

            tracing::trace!(
                %client_id,
                msg_type = msg.message_type().as_str(),
                "sending control frame"
            );
            let text = match msg.encode() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(%client_id, error = %e, "failed to encode control frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
        cancel.cancel();
    };

    let reader = async {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = ws_rx.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_client_text(&session, &state.settings, &text) {
                        queue_reply(&control_tx, client_id, reply);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    let err = Error::Protocol(format!(
                        "binary frames are not accepted ({} bytes)",
                        data.len()
                    ));
                    tracing::warn!(%client_id, error = %err, "rejected control frame");
                    queue_reply(&control_tx, client_id, ServerMessage::rejected(&err));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%client_id, error = %e, "control socket error");
                    break;
                }
            }
        }
        cancel.cancel();
    };

    tokio::join!(writer, reader);
    state.registry.remove(client_id);

    let outcome = pipeline.await;
    let stats = session.stats().snapshot();
    match outcome {
        Ok(Ok(exit)) => tracing::info!(
            %client_id,
            ?exit,
            cycles = stats.cycles_completed,
            bytes = stats.bytes_notified,
            uptime_ms = session.uptime().as_millis() as u64,
            "client disconnected"
        ),
        Ok(Err(e)) => tracing::warn!(
            %client_id,
            error = %e,
            cycles = stats.cycles_completed,
            "session ended with error"
        ),
        Err(e) => tracing::error!(%client_id, error = %e, "pipeline task panicked"),
    }
}

/// Apply one inbound text frame to a session. Returns a reply to queue, if any.
///
/// Malformed frames are answered with an `error` frame and otherwise ignored;
/// they never touch the ready latch.
pub fn handle_client_text(
    session: &ClientSession,
    settings: &SettingsHandle,
    text: &str,
) -> Option<ServerMessage> {
    let client_id = session.id();
    let msg = match ClientMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(%client_id, error = %e, "rejected control frame");
            return Some(ServerMessage::rejected(&e));
        }
    };
    tracing::trace!(
        %client_id,
        msg_type = msg.message_type().as_str(),
        "control frame received"
    );

    match msg {
        ClientMessage::ReceivedBuffers { elapsed_time } => {
            let reopened = session.acknowledge(elapsed_time);
            tracing::debug!(%client_id, elapsed_ms = elapsed_time, reopened, "buffers received");
        }
        ClientMessage::GraphSettings { payload } => {
            if !settings.forward(payload) {
                tracing::warn!(%client_id, "tick source stopped, dropping graph settings");
            }
        }
    }
    None
}

/// Queue a frame for the writer without waiting. While the writer is backed
/// up the frame is dropped, so a client that floods bad frames and never reads
/// cannot grow the queue.
fn queue_reply(control: &ControlSender, client_id: ClientId, reply: ServerMessage) {
    match control.try_send(reply) {
        Ok(()) => {}
        Err(TrySendError::Full(dropped)) => tracing::warn!(
            %client_id,
            msg_type = dropped.message_type().as_str(),
            "control queue full, dropping frame"
        ),
        Err(TrySendError::Closed(_)) => {}
    }
}
