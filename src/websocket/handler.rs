use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;

use crate::{middleware::AuthUser, state::AppState};

use super::{
    hub::{ChatHub, HubConnection},
    types::{ClientMessage, ServerEvent},
};

/// WebSocket upgrade handler
#[utoipa::path(
    get,
    path = "/ws",
    tag = "realtime",
    responses(
        (status = 101, description = "Switching to the WebSocket protocol"),
        (status = 401, description = "Unauthorized")
    ),
    params(
        ("access_token" = Option<String>, Query, description = "Bearer token for clients that cannot set headers")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    user: AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, user, state.hub))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user: AuthUser, hub: ChatHub) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let connection = hub.connect(user.tenant_id, user.user_id, tx);

    // Forward hub events to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to serialize hub event: {}", e),
            }
        }
    });

    // Dispatch client frames to the hub
    let recv_hub = hub.clone();
    let recv_connection = connection.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => process_client_frame(&text, &recv_hub, &recv_connection).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(&connection);
}

async fn process_client_frame(text: &str, hub: &ChatHub, connection: &HubConnection) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => hub.handle(connection, message).await,
        Err(e) => {
            tracing::debug!("Malformed frame on connection {}: {}", connection.id, e);
            connection.send(ServerEvent::error(
                "validation_error",
                format!("Invalid message format: {}", e),
            ));
        }
    }
}
