//! Track Fan-out Coordinator
//!
//! Reacts to newly received tracks and to joins: computes the exact
//! peer set under registry atomicity, then issues per-peer transport
//! calls with the lock released. Owns the per-track relay loop, its
//! keyframe-request timer, and the per-sender RTCP drain tasks. The
//! per-packet path never touches the registry lock.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

use super::registry::Room;
use crate::engine::opus_codec_capability;

/// How often the source is asked for a fresh reference frame so late
/// subscribers can resynchronize.
const KEYFRAME_REQUEST_INTERVAL: Duration = Duration::from_secs(3);

/// Handle a track received from `owner`: register it, fan it out to
/// every other current participant, and start its relay loop.
///
/// A failure to add the track on one target is logged and skipped;
/// that target is corrected by its own teardown if its connection is
/// actually dead.
pub async fn publish_track(
    room: Arc<Room>,
    owner: Uuid,
    owner_connection: Arc<RTCPeerConnection>,
    remote: Arc<TrackRemote>,
) {
    tracing::info!(
        "Received track {} ({:?}) from participant {}",
        remote.id(),
        remote.kind(),
        owner
    );

    let local = Arc::new(TrackLocalStaticRTP::new(
        opus_codec_capability(),
        remote.id(),
        format!("voicelink-{owner}"),
    ));

    let Some((track_id, targets)) = room.register_track(owner, local.clone()).await else {
        tracing::warn!(
            "Dropping track {} from {}: owner already removed",
            remote.id(),
            owner
        );
        return;
    };

    for (target_id, target_connection) in targets {
        match target_connection.add_track(local.clone()).await {
            Ok(sender) => spawn_rtcp_drain(sender, target_id),
            Err(e) => {
                tracing::warn!("Failed to add track {} to participant {}: {}", track_id, target_id, e);
            }
        }
    }

    let media_ssrc = remote.ssrc();
    tokio::spawn(async move {
        let keyframe_timer = spawn_keyframe_requester(owner_connection, media_ssrc, track_id.clone());

        relay(remote, local, &track_id).await;

        // Timer lifetime is tied 1:1 to the relay loop.
        keyframe_timer.abort();
        room.remove_track(&track_id).await;
    });
}

/// Subscribe a joining participant to every track that already exists.
///
/// The subscription set is fixed atomically by the registry; per-track
/// add failures are non-fatal and the join succeeds without that one
/// track. Order across tracks is unspecified.
pub async fn subscribe_to_existing(
    room: &Room,
    connection: &Arc<RTCPeerConnection>,
    joiner: Uuid,
) {
    for (track_id, local) in room.adopt_existing_tracks(joiner).await {
        match connection.add_track(local).await {
            Ok(sender) => spawn_rtcp_drain(sender, joiner),
            Err(e) => {
                tracing::warn!("Failed to add existing track {} to joiner {}: {}", track_id, joiner, e);
            }
        }
    }
}

/// Forward RTP from the remote track to the shared local track, in
/// receipt order, each packet written at most once.
///
/// A closed-pipe write error means no subscriber is attached yet and
/// is ignored; any read error or other write error ends the track's
/// life. Subscriber-side failures surface on their own connections and
/// never reach this loop.
async fn relay(remote: Arc<TrackRemote>, local: Arc<TrackLocalStaticRTP>, track_id: &str) {
    loop {
        match remote.read_rtp().await {
            Ok((packet, _attributes)) => {
                if let Err(err) = local.write_rtp(&packet).await {
                    if err == webrtc::Error::ErrClosedPipe {
                        continue;
                    }
                    tracing::warn!("Relay write failed for track {}: {}", track_id, err);
                    break;
                }
            }
            Err(err) => {
                tracing::debug!("Relay read ended for track {}: {}", track_id, err);
                break;
            }
        }
    }
}

/// Periodically ask the source for a keyframe on behalf of late
/// subscribers. Ends when the owning connection stops accepting RTCP;
/// otherwise aborted by the relay loop it belongs to.
fn spawn_keyframe_requester(
    connection: Arc<RTCPeerConnection>,
    media_ssrc: u32,
    track_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(KEYFRAME_REQUEST_INTERVAL);
        loop {
            interval.tick().await;
            let pli = PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            };
            if let Err(err) = connection.write_rtcp(&[Box::new(pli)]).await {
                tracing::debug!("Keyframe requester for track {} ended: {}", track_id, err);
                break;
            }
        }
    })
}

/// Drain RTCP feedback reports for one outbound sender and discard
/// them. Must run for the full life of the subscription or the
/// transport's internal buffering stalls.
fn spawn_rtcp_drain(sender: Arc<RTCRtpSender>, subscriber_id: Uuid) {
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
        tracing::debug!("RTCP drain ended for subscriber {}", subscriber_id);
    });
}
