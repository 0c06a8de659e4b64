use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;

use crate::realtime::ObserverId;
use crate::service::PollService;

/// Messages an observer may send over its socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinPoll {
        #[serde(rename = "pollId")]
        poll_id: String,
    },
    LeavePoll {
        #[serde(rename = "pollId")]
        poll_id: String,
    },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<Arc<PollService>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(service, socket))
}

async fn ws_connection(service: Arc<PollService>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut observer = service.connect();
    let observer_id = observer.id;
    info!(
        "WebSocket opened for {} ({} observers connected)",
        observer_id,
        service.router().observer_count()
    );

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = observer.events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode event for {}: {}", observer_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        // The router dropped this observer for falling behind.
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&service, observer_id, &text)
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    service.disconnect(observer_id);
    send_task.abort();
}

fn handle_client_message(service: &PollService, observer_id: ObserverId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::JoinPoll { poll_id }) => {
            if service.subscribe(observer_id, &poll_id) {
                debug!(
                    "{} watching poll {} ({} observers)",
                    observer_id,
                    poll_id,
                    service.router().group_size(&poll_id)
                );
            }
        }
        Ok(ClientMessage::LeavePoll { poll_id }) => service.unsubscribe(observer_id, &poll_id),
        Err(e) => warn!("Ignoring malformed message from {}: {}", observer_id, e),
    }
}
