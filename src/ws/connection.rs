//! WebSocket read/write loop for a single peer.
//!
//! Inbound text frames are decoded as call envelopes and dispatched
//! through the [`ClientManager`]; replies go straight back on the socket.
//! Pushes queued on the connection's outbound channel are written as
//! they arrive.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::messages::{WsMessage, WsMessageType};
use crate::rpc::Connection;
use crate::service::ClientManager;

/// Runs the read/write loop for a single WebSocket connection.
///
/// When the socket closes, errors, or stops accepting writes, the
/// [`Connection`] is closed so its close listeners (session teardown)
/// run exactly once.
pub async fn run_connection(
    socket: WebSocket,
    manager: Arc<ClientManager>,
    outbound_capacity: usize,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel(outbound_capacity.max(1));
    let connection = Connection::new(out_tx);
    let connection_id = connection.id();
    tracing::debug!(%connection_id, "ws connection opened");

    loop {
        tokio::select! {
            // Incoming frame from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_text_message(&text, &manager, &connection).await;
                        if send_message(&mut ws_tx, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%connection_id, error = %e, "ws read failed");
                        break;
                    }
                    _ => {}
                }
            }
            // Push queued by a client function
            outbound = out_rx.recv() => {
                let Some(push) = outbound else {
                    break;
                };
                if send_message(&mut ws_tx, &push).await.is_err() {
                    break;
                }
            }
        }
    }

    connection.close().await;
}

/// Decodes one text frame, dispatches it and returns the reply envelope.
pub async fn handle_text_message(
    text: &str,
    manager: &ClientManager,
    connection: &Arc<Connection>,
) -> WsMessage {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return WsMessage::error("", 400, "malformed JSON");
    };
    if msg.msg_type != WsMessageType::Call {
        return WsMessage::error(msg.id, 400, "expected a call");
    }
    let Some(method) = msg.method.as_deref() else {
        return WsMessage::error(msg.id, 400, "missing method");
    };

    match manager.dispatch(connection, method, msg.arguments()).await {
        Ok(result) => WsMessage::response(msg.id, result),
        Err(e) => {
            tracing::debug!(
                connection_id = %connection.id(),
                method,
                error = %e,
                "call failed"
            );
            WsMessage::error(msg.id, e.error_code(), e.to_string())
        }
    }
}

async fn send_message<S>(sink: &mut S, msg: &WsMessage) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode ws message");
            return Ok(());
        }
    };
    sink.send(Message::text(json)).await
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::World;
    use crate::service::OpenAuthenticator;
    use serde_json::json;

    async fn setup() -> (Arc<ClientManager>, Arc<Connection>) {
        let world = Arc::new(World::new());
        let manager = ClientManager::new(world, Arc::new(OpenAuthenticator)).await;
        let (tx, _rx) = mpsc::channel(8);
        (manager, Connection::new(tx))
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let (manager, conn) = setup().await;
        let reply = handle_text_message("not json", &manager, &conn).await;
        assert_eq!(reply.msg_type, WsMessageType::Error);
        assert_eq!(reply.payload["code"], json!(400));
    }

    #[tokio::test]
    async fn unknown_method_is_404() {
        let (manager, conn) = setup().await;
        let text = r#"{"id":"3","type":"call","method":"nope.nothing","payload":[]}"#;
        let reply = handle_text_message(text, &manager, &conn).await;
        assert_eq!(reply.id, "3");
        assert_eq!(reply.payload["code"], json!(404));
    }

    #[tokio::test]
    async fn login_call_gets_response() {
        let (manager, conn) = setup().await;
        let text = r#"{"id":"1","type":"call","method":"auth.login","payload":["alice","x"]}"#;
        let reply = handle_text_message(text, &manager, &conn).await;
        assert_eq!(reply.msg_type, WsMessageType::Response);
        assert_eq!(reply.id, "1");
        assert_eq!(reply.payload, json!(true));
    }

    #[tokio::test]
    async fn non_call_envelope_is_rejected() {
        let (manager, conn) = setup().await;
        let text = r#"{"id":"2","type":"response","payload":1}"#;
        let reply = handle_text_message(text, &manager, &conn).await;
        assert_eq!(reply.msg_type, WsMessageType::Error);
    }
}
