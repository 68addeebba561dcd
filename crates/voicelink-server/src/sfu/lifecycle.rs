//! Participant Lifecycle Manager
//!
//! Drives each participant through
//! `Negotiating -> Connected -> {Disconnected, Closed} -> Removed` and
//! performs idempotent teardown: close the transport connection, then
//! remove the participant from the registry. Repeated close events
//! collapse into a single removal.

use std::sync::{Arc, Weak};
use uuid::Uuid;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use super::registry::{ParticipantState, Room};

/// Register the connection-state handler for a participant.
///
/// `Failed` is treated like `Disconnected`: leaving a dead connection
/// registered only leaks tracks and subscriptions.
pub fn attach(connection: &Arc<RTCPeerConnection>, room: Arc<Room>, id: Uuid) {
    // Weak reference: the callback must not keep the connection alive
    // once the registry has dropped it.
    let weak_connection = Arc::downgrade(connection);

    connection.on_peer_connection_state_change(Box::new(move |conn_state| {
        let room = room.clone();
        let weak_connection = weak_connection.clone();

        Box::pin(async move {
            match conn_state {
                RTCPeerConnectionState::Connected => {
                    if room.set_state(id, ParticipantState::Connected).await.is_some() {
                        tracing::info!("Participant {} connected", id);
                    }
                }
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                    teardown(&room, weak_connection, id, ParticipantState::Disconnected).await;
                }
                RTCPeerConnectionState::Closed => {
                    teardown(&room, weak_connection, id, ParticipantState::Closed).await;
                }
                _ => {}
            }
        })
    }));
}

/// Tear a participant down: record the terminal transition, close the
/// transport connection, then remove it from the registry.
///
/// Safe to call any number of times; after the first removal the
/// registry returns nothing and this is a no-op.
pub async fn teardown(
    room: &Room,
    connection: Weak<RTCPeerConnection>,
    id: Uuid,
    terminal: ParticipantState,
) {
    if let Some(previous) = room.set_state(id, terminal).await {
        tracing::info!("Participant {} {:?} -> {:?}", id, previous, terminal);
    }

    if let Some(connection) = connection.upgrade() {
        if let Err(e) = connection.close().await {
            tracing::warn!("Error closing connection for {}: {}", id, e);
        }
    }

    match room.remove_participant(id).await {
        Some(removed) => {
            tracing::info!(
                "Participant {} {:?}: {} owned tracks and {} subscriptions cleaned up",
                id,
                removed.state,
                removed.owned_tracks.len(),
                removed.subscriptions.len()
            );
        }
        None => {
            tracing::debug!("Participant {} already removed", id);
        }
    }
}
