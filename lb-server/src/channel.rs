use std::sync::atomic::Ordering;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{logging::category_channel, server::AppState};

#[derive(Clone, Debug, Deserialize)]
struct ChannelMessage {
    #[serde(rename = "nodeId")]
    node_id: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    mask: Option<String>,
}

#[derive(Serialize)]
struct ChannelAck<'a> {
    r#type: &'static str,
    #[serde(rename = "nodeId")]
    node_id: &'a str,
    status: &'static str,
}

#[derive(Serialize)]
struct ChannelErrorReply {
    status: &'static str,
    message: String,
}

pub(crate) async fn channel_handler(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let max_message_size = state.config.max_channel_msg_bytes;
    upgrade
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| run_channel(state, socket))
}

async fn run_channel(state: AppState, mut socket: WebSocket) {
    info!("{} connection opened", category_channel());
    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!("{} connection error: {err}", category_channel());
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let reply = handle_channel_text(&state, text.as_str());
                if socket.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!("{} connection closed", category_channel());
}

// A malformed message is answered with an error object; the connection
// stays open so the editor can retry without reconnecting.
pub fn handle_channel_text(state: &AppState, text: &str) -> String {
    state
        .metrics
        .channel_messages_total
        .fetch_add(1, Ordering::Relaxed);

    let message = match serde_json::from_str::<ChannelMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            warn!("{} failed to parse message: {err}", category_channel());
            return error_reply(state, format!("invalid channel message: {err}"));
        }
    };
    let Some(node_id) = message
        .node_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return error_reply(state, "nodeId is required".to_string());
    };

    state.runtime.edits.receive(
        node_id,
        message.image.map(canvas::TextEncodedImage::from_string),
        message.mask.map(canvas::TextEncodedImage::from_string),
    );
    info!("{} received edit for node {node_id}", category_channel());

    let ack = ChannelAck {
        r#type: "ack",
        node_id,
        status: "success",
    };
    match serde_json::to_string(&ack) {
        Ok(reply) => {
            debug!("{} acked node {node_id}", category_channel());
            reply
        }
        Err(err) => error_reply(state, format!("failed to serialize ack: {err}")),
    }
}

fn error_reply(state: &AppState, message: String) -> String {
    state
        .metrics
        .channel_errors_total
        .fetch_add(1, Ordering::Relaxed);
    serde_json::to_string(&ChannelErrorReply {
        status: "error",
        message,
    })
    .unwrap_or_else(|_| r#"{"status":"error","message":"internal error"}"#.to_string())
}
