/// Comms WebSocket endpoint
/// 
/// Bridges one WebSocket to one hub session: hub frames are written out as
/// text, inbound text frames are handed to the hub.

use crate::{
    api::admin::AppState,
    comms::{CommsHub, FrameOutcome, HubSession},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

/// Create the comms route at `path`
pub fn create_comms_routes(path: &str) -> Router<AppState> {
    Router::new().route(path, get(comms_upgrade))
}

async fn comms_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<CommsHub>) {
    let HubSession { id, mut frames } = hub.connect();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if hub.handle_frame(id, text.as_str()) == FrameOutcome::Close {
                        // flush the rejection before closing
                        while let Ok(text) = frames.try_recv() {
                            let _ = sink.send(Message::Text(text.into())).await;
                        }
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.disconnect(id);
}
