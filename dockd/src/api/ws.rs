use std::time::Duration;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use crate::api::routes::AppState;
use crate::sync::{protocol, ConnectionChannel, DisconnectReason, Outbound};

/// How long a finished connection waits for its close frame to be flushed
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// GET /ws
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

/// Drive one sync connection.
///
/// The socket is split: a writer task drains the connection's channel into the
/// sink, while this task reads inbound frames. The registry holds the only
/// sender, so removing the connection there ends the writer.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (channel, rx) = ConnectionChannel::new();
    let mut writer = tokio::spawn(writer_task(sink, rx));

    let id = match state.registry.connect(channel).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Connection refused: {}", e);
            finish_writer(writer).await;
            return;
        }
    };

    if !protocol::send_initial_sync(id, &state.registry, &state.store).await {
        finish_writer(writer).await;
        return;
    }

    let writer_done = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    protocol::handle_text(&text, id, &state.registry, &state.store).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::warn!(connection_id = %id, len = data.len(), "Discarding binary frame");
                }
                Some(Ok(Message::Pong(_))) => state.registry.mark_alive(id).await,
                // Answered by the transport
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %id, frame = ?frame, "Client initiated close");
                    break false;
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %id, error = %e, "WebSocket receive error");
                    break false;
                }
                None => break false,
            },
            _ = &mut writer => break true,
        }
    };

    state.registry.disconnect(id, DisconnectReason::ClientClosed).await;
    if !writer_done {
        finish_writer(writer).await;
    }
}

/// Wait for the writer to flush whatever the registry queued last, usually a close frame
async fn finish_writer(mut writer: tokio::task::JoinHandle<()>) {
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Forward queued frames to the socket. Stops after a close frame or a failed send.
async fn writer_task(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(frame) = rx.recv().await {
        let (message, last) = match frame {
            Outbound::Text(text) => (Message::Text(text), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };
        if sink.send(message).await.is_err() || last {
            break;
        }
    }
}
