//! WebSocket channel bridge
//!
//! Binds one long-lived connection to one team-scoped channel. The client
//! chooses a sub-channel via the `channel` query parameter (validated
//! against a strict allow-list); team identity comes from the handshake
//! headers, never from the query string. Messages delivered on the
//! composed channel `{team_id}:{sub_channel}` are forwarded verbatim to
//! the socket, and closing the connection tears the subscription down
//! before the task exits - there is no other connection state to release.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::infrastructure::pubsub::{valid_channel_name, Subscriber};
use crate::presentation::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    channel: String,
}

/// `GET /subscribe?channel=<name>` - upgrade to a WebSocket subscribed to
/// the caller's team channel.
///
/// Violations are rejected before the upgrade completes, so nothing is
/// ever subscribed for a connection we refuse.
pub async fn subscribe(
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !valid_channel_name(&params.channel) {
        warn!(
            channel = %params.channel,
            "rejecting subscription with invalid channel name"
        );
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let identity = state.identity.resolve(&headers);
    let team_id = match identity.team_id() {
        Ok(team_id) => team_id.to_string(),
        Err(e) => {
            error!("rejecting subscription, no team identity: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, team_id, params.channel))
}

async fn handle_socket(socket: WebSocket, state: AppState, team_id: String, sub_channel: String) {
    let connection_id = Uuid::new_v4();
    let full_channel = format!("{}:{}", team_id, sub_channel);

    // Bridge pub/sub deliveries into the socket task through a channel so
    // the subscriber callback never blocks dispatch.
    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<String>();
    let handler: Subscriber = Arc::new(move |payload: &str| {
        let _ = delivery_tx.send(payload.to_string());
    });

    let subscription = match state.pubsub.subscribe(&full_channel, handler).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(%connection_id, channel = %full_channel, "bus subscription failed: {}", e);
            return;
        }
    };

    info!(%connection_id, team_id = %team_id, channel = %sub_channel, "client subscribed");

    // Fire "on first subscriber" hooks for this sub-channel.
    state
        .hooks
        .notify(&sub_channel, state.team_scope_for(team_id.clone()))
        .await;

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            delivery = delivery_rx.recv() => match delivery {
                Some(message) => {
                    if sender.send(Message::Text(message.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(frame)) => {
                    // This is a one-way bridge; inbound traffic is noted
                    // and discarded.
                    debug!(%connection_id, "ignoring inbound frame: {:?}", frame);
                }
                Some(Err(e)) => {
                    debug!(%connection_id, "websocket error: {}", e);
                    break;
                }
            },
        }
    }

    // Tear down the subscription before the connection is discarded so no
    // dangling fanout remains.
    if let Err(e) = subscription.unsubscribe().await {
        warn!(%connection_id, channel = %full_channel, "failed to unsubscribe: {}", e);
    }

    info!(%connection_id, channel = %sub_channel, "client left channel");
}
