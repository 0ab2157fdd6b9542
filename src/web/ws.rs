//! Live dashboard channel over WebSocket.
//!
//! A client first receives an `initial` snapshot, then one `metrics` frame per
//! recorded sample and one `alert` frame per fired alert. A client that falls
//! behind the event bus is sent a fresh snapshot and continues from there.

use super::AppState;
use crate::monitor::{Collector, DashboardMessage};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

pub async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_dashboard(socket, state.collector))
}

async fn stream_dashboard(mut socket: WebSocket, collector: Arc<Collector>) {
    let (snapshot, mut rx) = collector.subscribe();
    tracing::debug!("Dashboard client connected ({} subscribers)", collector.subscriber_count());

    if send(&mut socket, &DashboardMessage::Initial(snapshot)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Some(message) = DashboardMessage::from_event(event) else {
                        continue;
                    };
                    if send(&mut socket, &message).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dashboard client lagged by {} events, resending snapshot", skipped);
                    let (snapshot, fresh) = collector.subscribe();
                    rx = fresh;
                    if send(&mut socket, &DashboardMessage::Initial(snapshot)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("Dashboard client disconnected");
}

async fn send(socket: &mut WebSocket, message: &DashboardMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => socket.send(Message::Text(text.into())).await,
        Err(e) => {
            tracing::error!("Failed to encode dashboard message: {}", e);
            Ok(())
        }
    }
}
