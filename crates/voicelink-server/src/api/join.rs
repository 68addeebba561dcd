//! The single signaling call: an SDP offer in, a complete answer and a
//! participant id out. Everything after a successful answer happens
//! through the transport's own event callbacks.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::error::{AppError, Result};
use crate::sfu::{fanout, lifecycle, ParticipantState};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub participant_id: Uuid,
    pub answer: RTCSessionDescription,
}

/// Admit one participant into the room.
///
/// A malformed offer is rejected before any state is created; a
/// negotiation failure after registration tears the participant down
/// so no partial state survives a rejected join.
pub async fn join(State(state): State<AppState>, body: String) -> Result<Json<JoinResponse>> {
    let offer: RTCSessionDescription = serde_json::from_str(&body)
        .map_err(|e| AppError::BadRequest(format!("Could not parse session description: {e}")))?;
    if offer.sdp.trim().is_empty() {
        return Err(AppError::BadRequest("Empty SDP offer".to_string()));
    }

    let participant_id = Uuid::new_v4();
    let peer_connection = state.engine.create_peer_connection().await?;

    state
        .room
        .register_participant(participant_id, peer_connection.clone())
        .await;

    lifecycle::attach(&peer_connection, state.room.clone(), participant_id);

    // Fan out whatever this participant publishes.
    let room = state.room.clone();
    let weak_connection = Arc::downgrade(&peer_connection);
    peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
        let room = room.clone();
        let weak_connection = weak_connection.clone();

        Box::pin(async move {
            if let Some(owner_connection) = weak_connection.upgrade() {
                fanout::publish_track(room, participant_id, owner_connection, track).await;
            }
        })
    }));

    // Allow the participant to publish audio.
    if let Err(e) = peer_connection
        .add_transceiver_from_kind(RTPCodecType::Audio, None)
        .await
    {
        lifecycle::teardown(
            &state.room,
            Arc::downgrade(&peer_connection),
            participant_id,
            ParticipantState::Closed,
        )
        .await;
        return Err(AppError::Negotiation(e));
    }

    // Everything already published goes onto this connection before
    // the answer is built, so it is covered by this negotiation.
    fanout::subscribe_to_existing(&state.room, &peer_connection, participant_id).await;

    let answer = match state.engine.negotiate(&peer_connection, offer).await {
        Ok(answer) => answer,
        Err(e) => {
            lifecycle::teardown(
                &state.room,
                Arc::downgrade(&peer_connection),
                participant_id,
                ParticipantState::Closed,
            )
            .await;
            return Err(AppError::Negotiation(e));
        }
    };

    tracing::info!("Participant {} joined the room", participant_id);

    Ok(Json(JoinResponse {
        participant_id,
        answer,
    }))
}
