//! Session Registry
//!
//! Authoritative store of the room's participants and published tracks.
//! All membership and subscription state lives behind a single
//! readers/writer lock and is mutated only through the compound
//! operations below, so callers never do their own read-modify-write.
//! The lock is held for in-memory mutation only; every transport call
//! (add_track, close, write_rtp) happens after it is released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// Connection lifecycle of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Negotiating,
    Connected,
    Disconnected,
    Closed,
    Removed,
}

/// One member of the room.
pub struct Participant {
    pub id: Uuid,
    /// Transport connection, exclusively owned by this entry.
    pub connection: Arc<RTCPeerConnection>,
    /// Ids of the forwarded tracks this participant receives.
    pub subscriptions: HashSet<String>,
    pub state: ParticipantState,
}

/// One published track being fanned out to subscribers.
pub struct ForwardedTrack {
    pub id: String,
    pub owner: Uuid,
    /// Sendable handle. The registry owns it; subscribing peer
    /// connections hold shared references through add_track.
    pub local: Arc<TrackLocalStaticRTP>,
    /// Subscriber ids. Never contains the owner.
    pub subscribers: HashSet<Uuid>,
}

/// Summary returned by [`Room::remove_participant`].
pub struct RemovedParticipant {
    /// Terminal state recorded for the participant.
    pub state: ParticipantState,
    /// Tracks the participant owned, removed together with it.
    pub owned_tracks: Vec<ForwardedTrack>,
    /// Track ids the participant was subscribed to.
    pub subscriptions: Vec<String>,
}

/// Consistent copy of the room used for observation and tests.
pub struct RoomSnapshot {
    pub participants: Vec<Uuid>,
    pub tracks: Vec<(String, Uuid, Arc<TrackLocalStaticRTP>)>,
}

#[derive(Default)]
struct RoomState {
    participants: HashMap<Uuid, Participant>,
    tracks: HashMap<String, ForwardedTrack>,
}

/// The single shared room.
#[derive(Default)]
pub struct Room {
    state: RwLock<RoomState>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted participant in `Negotiating` state.
    pub async fn register_participant(&self, id: Uuid, connection: Arc<RTCPeerConnection>) {
        let mut state = self.state.write().await;
        state.participants.insert(
            id,
            Participant {
                id,
                connection,
                subscriptions: HashSet::new(),
                state: ParticipantState::Negotiating,
            },
        );
        tracing::info!("Registered participant {} ({} in room)", id, state.participants.len());
    }

    /// Record a lifecycle transition. Returns the previous state, or
    /// `None` if the participant is unknown (already removed).
    pub async fn set_state(&self, id: Uuid, new_state: ParticipantState) -> Option<ParticipantState> {
        let mut state = self.state.write().await;
        let participant = state.participants.get_mut(&id)?;
        let previous = participant.state;
        participant.state = new_state;
        Some(previous)
    }

    /// Remove a participant, every track it owns, and its id from every
    /// other track's subscriber set, in one atomic step.
    ///
    /// Returns `None` if the participant was already removed, making
    /// racing removal attempts (e.g. two close events) a no-op. The
    /// registry is never observable with an ownerless track or a
    /// subscriber entry pointing at a removed participant.
    pub async fn remove_participant(&self, id: Uuid) -> Option<RemovedParticipant> {
        let mut state = self.state.write().await;
        let mut participant = state.participants.remove(&id)?;
        participant.state = ParticipantState::Removed;

        let owned_ids: Vec<String> = state
            .tracks
            .values()
            .filter(|t| t.owner == id)
            .map(|t| t.id.clone())
            .collect();

        let mut owned_tracks = Vec::with_capacity(owned_ids.len());
        for track_id in owned_ids {
            if let Some(track) = state.tracks.remove(&track_id) {
                for subscriber_id in &track.subscribers {
                    if let Some(subscriber) = state.participants.get_mut(subscriber_id) {
                        subscriber.subscriptions.remove(&track_id);
                    }
                }
                owned_tracks.push(track);
            }
        }

        for track in state.tracks.values_mut() {
            track.subscribers.remove(&id);
        }

        let subscriptions: Vec<String> = participant.subscriptions.drain().collect();

        tracing::info!(
            "Removed participant {} ({} owned tracks, {} subscriptions, {} left in room)",
            id,
            owned_tracks.len(),
            subscriptions.len(),
            state.participants.len()
        );

        Some(RemovedParticipant {
            state: participant.state,
            owned_tracks,
            subscriptions,
        })
    }

    /// Register a track published by `owner` and freeze its fan-out
    /// set to the participants registered right now, excluding the
    /// owner. Returns the track id plus each target's connection so
    /// the caller can issue add_track calls after the lock is gone.
    ///
    /// Returns `None` when the owner is no longer registered (the
    /// track raced its owner's teardown), in which case no state is
    /// created.
    pub async fn register_track(
        &self,
        owner: Uuid,
        local: Arc<TrackLocalStaticRTP>,
    ) -> Option<(String, Vec<(Uuid, Arc<RTCPeerConnection>)>)> {
        let mut state = self.state.write().await;
        if !state.participants.contains_key(&owner) {
            return None;
        }

        let track_id = format!("{}-{}", owner, local.id());
        let mut subscribers = HashSet::new();
        let mut targets = Vec::new();

        for (participant_id, participant) in state.participants.iter_mut() {
            if *participant_id == owner {
                continue;
            }
            subscribers.insert(*participant_id);
            participant.subscriptions.insert(track_id.clone());
            targets.push((*participant_id, participant.connection.clone()));
        }

        state.tracks.insert(
            track_id.clone(),
            ForwardedTrack {
                id: track_id.clone(),
                owner,
                local,
                subscribers,
            },
        );

        tracing::info!(
            "Registered track {} from {} with {} subscribers",
            track_id,
            owner,
            targets.len()
        );

        Some((track_id, targets))
    }

    /// Drop a track and strip it from all subscription sets. Used when
    /// a relay loop dies while its owner is still connected; removal
    /// of the owner covers its tracks already.
    pub async fn remove_track(&self, track_id: &str) {
        let mut state = self.state.write().await;
        if let Some(track) = state.tracks.remove(track_id) {
            for subscriber_id in &track.subscribers {
                if let Some(subscriber) = state.participants.get_mut(subscriber_id) {
                    subscriber.subscriptions.remove(track_id);
                }
            }
            tracing::info!("Removed track {} from {}", track_id, track.owner);
        }
    }

    /// Subscribe `joiner` to every registered track it does not yet
    /// receive and does not own. The subscription records are written
    /// under one lock hold, so a track published concurrently with the
    /// join is delivered exactly once: either its fan-out freeze
    /// already included the joiner or it is picked up here, never
    /// both. Returns the handles for the caller to add outside the
    /// lock.
    pub async fn adopt_existing_tracks(
        &self,
        joiner: Uuid,
    ) -> Vec<(String, Arc<TrackLocalStaticRTP>)> {
        let mut state = self.state.write().await;
        if !state.participants.contains_key(&joiner) {
            return Vec::new();
        }

        let mut adopted = Vec::new();
        for (track_id, track) in state.tracks.iter_mut() {
            if track.owner == joiner || track.subscribers.contains(&joiner) {
                continue;
            }
            track.subscribers.insert(joiner);
            adopted.push((track_id.clone(), track.local.clone()));
        }

        if let Some(participant) = state.participants.get_mut(&joiner) {
            for (track_id, _) in &adopted {
                participant.subscriptions.insert(track_id.clone());
            }
        }

        adopted
    }

    /// Consistent copy of participants and tracks.
    pub async fn snapshot(&self) -> RoomSnapshot {
        let state = self.state.read().await;
        RoomSnapshot {
            participants: state.participants.keys().copied().collect(),
            tracks: state
                .tracks
                .values()
                .map(|t| (t.id.clone(), t.owner, t.local.clone()))
                .collect(),
        }
    }

    /// Ids of all registered participants.
    pub async fn participant_ids(&self) -> HashSet<Uuid> {
        self.state.read().await.participants.keys().copied().collect()
    }

    /// Ids of all registered tracks.
    pub async fn track_ids(&self) -> HashSet<String> {
        self.state.read().await.tracks.keys().cloned().collect()
    }

    /// Current subscriber set of a track.
    pub async fn subscribers_of(&self, track_id: &str) -> Option<HashSet<Uuid>> {
        self.state
            .read()
            .await
            .tracks
            .get(track_id)
            .map(|t| t.subscribers.clone())
    }

    /// Track ids a participant currently receives.
    pub async fn subscriptions_of(&self, id: Uuid) -> Option<HashSet<String>> {
        self.state
            .read()
            .await
            .participants
            .get(&id)
            .map(|p| p.subscriptions.clone())
    }

    /// Current lifecycle state of a participant.
    pub async fn state_of(&self, id: Uuid) -> Option<ParticipantState> {
        self.state.read().await.participants.get(&id).map(|p| p.state)
    }
}
