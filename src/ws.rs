//! WebSocket endpoint: upgrades, admits the connection through the
//! coordinator, and relays binary FLV frames. Viewer-to-server messages
//! are never meaningful and are discarded.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::client_manager::ViewerFrame;
use crate::coordinator::{ConnectOutcome, CoordinatorHandle};

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(coordinator): State<CoordinatorHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, coordinator))
}

async fn handle_socket(socket: WebSocket, coordinator: CoordinatorHandle) {
    let outcome = coordinator.connect_viewer().await;

    let (viewer_id, mut receiver) = match outcome {
        ConnectOutcome::Admitted { viewer_id, receiver } => (viewer_id, receiver),
        ConnectOutcome::Rejected { close_code } => {
            close_immediately(socket, close_code).await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    let reader = tokio::spawn(async move {
        // The wire contract never expects viewer→server messages; drain
        // and discard until the socket closes so the connection's read
        // half doesn't build up a backlog.
        while stream.next().await.is_some() {}
    });

    let writer = tokio::spawn(async move {
        while let Some(frame) = receiver.recv().await {
            match frame {
                ViewerFrame::Data(bytes) => {
                    if sink.send(Message::Binary(bytes.to_vec())).await.is_err() {
                        return;
                    }
                }
                ViewerFrame::Close(code) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "".into(),
                        })))
                        .await;
                    return;
                }
            }
        }
    });

    let _ = writer.await;
    reader.abort();
    coordinator.disconnect_viewer(viewer_id).await;
}

async fn close_immediately(socket: WebSocket, code: u16) {
    let (mut sink, _stream) = socket.split();
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: "".into(),
        })))
        .await;
}
