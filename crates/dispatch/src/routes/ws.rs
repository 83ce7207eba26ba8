//! Realtime event socket.
//!
//! Clients connect to `GET /ws?token=...` (browsers cannot set headers on a
//! WebSocket handshake). Every [`Event`](crate::notify::Event) addressed to
//! the principal is pushed as a JSON text frame. Clients may send:
//!
//! ```text
//! {"type": "ping"}                            -> {"type": "pong"}
//! {"type": "location", "lat": .., "lng": ..}  (captains only)
//! ```
//!
//! Malformed frames get `{"type": "error", "message": ...}` and the socket
//! stays open.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tiffin_core::GeoPoint;
use tracing::{debug, info, warn};

use crate::error::add_breadcrumb;
use crate::middleware::Authenticated;
use crate::models::Principal;
use crate::state::AppState;
use crate::store::DispatchStore;

/// Frames a client may send.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    Location { lat: f64, lng: f64 },
}

/// Direct replies to client frames.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply {
    Pong,
    Error { message: String },
}

/// GET /ws
pub async fn socket<S: DispatchStore>(
    State(state): State<AppState<S>>,
    Authenticated(principal): Authenticated,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve(state, principal, socket))
}

async fn serve<S: DispatchStore>(state: AppState<S>, principal: Principal, socket: WebSocket) {
    let mut subscription = state.hub().subscribe(principal).await;
    let (mut sink, mut stream) = socket.split();
    info!(%principal, connection_id = subscription.id, "Socket connected");
    let party = principal.to_string();
    add_breadcrumb("ws", "Socket connected", Some(&[("principal", party.as_str())]));

    loop {
        tokio::select! {
            event = subscription.rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, event = event.name(), "Failed to encode event"),
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Some(reply) = handle_frame(&state, principal, text.as_str()).await else {
                        continue;
                    };
                    let Ok(text) = serde_json::to_string(&reply) else { continue };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%principal, error = %e, "Socket read failed");
                    break;
                }
            }
        }
    }

    state.hub().unsubscribe(principal, subscription.id).await;
    info!(%principal, connection_id = subscription.id, "Socket closed");
    add_breadcrumb("ws", "Socket closed", Some(&[("principal", party.as_str())]));
}

/// Act on one client frame and return the reply, if any.
async fn handle_frame<S: DispatchStore>(
    state: &AppState<S>,
    principal: Principal,
    text: &str,
) -> Option<Reply> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            return Some(Reply::Error {
                message: format!("invalid message: {e}"),
            });
        }
    };

    match message {
        ClientMessage::Ping => Some(Reply::Pong),
        ClientMessage::Location { lat, lng } => {
            let Some(captain) = principal.as_captain() else {
                return Some(error("only captains report location"));
            };
            let location = match GeoPoint::new(lat, lng) {
                Ok(location) => location,
                Err(e) => return Some(error(e.to_string())),
            };
            match state
                .dispatch()
                .update_captain_location(captain, location)
                .await
            {
                Ok(_) => None,
                Err(e) => Some(error(e.to_string())),
            }
        }
    }
}

fn error(message: impl Into<String>) -> Reply {
    Reply::Error {
        message: message.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_client_frames() {
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"location","lat":12.9,"lng":77.6}"#)
                .unwrap(),
            ClientMessage::Location {
                lat: 12.9,
                lng: 77.6
            }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_reply_wire_format() {
        assert_eq!(
            serde_json::to_string(&Reply::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );
        assert_eq!(
            serde_json::to_string(&error("nope")).unwrap(),
            r#"{"type":"error","message":"nope"}"#
        );
    }
}
