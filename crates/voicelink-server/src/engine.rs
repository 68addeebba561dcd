//! Transport Engine
//!
//! Wraps the WebRTC API object shared by all peer connections: media
//! engine with the Opus codec, default interceptors, and the ICE
//! server configuration. Also runs the offer/answer exchange for a
//! join, blocking on candidate gathering so the returned answer is
//! complete and no trickle channel is needed.

use anyhow::Result;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::api::API;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

use crate::state::TurnServer;

/// Opus capability used both for the media engine registration and for
/// every forwarded local track.
///
/// IMPORTANT: forwarded tracks must use a capability that exactly
/// matches what is registered here, not the capability reported by the
/// source track (which may carry different fmtp parameters). Otherwise
/// add_track fails with "no codecs".
pub fn opus_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// Shared WebRTC machinery for all participant connections.
pub struct TransportEngine {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl TransportEngine {
    pub fn new(stun_servers: Vec<String>, turn_servers: Vec<TurnServer>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: opus_codec_capability(),
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let setting_engine = SettingEngine::default();

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let mut ice_servers = vec![];

        for stun_url in stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url],
                ..Default::default()
            });
        }

        for turn in turn_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![turn.url],
                username: turn.username,
                credential: turn.credential,
                ..Default::default()
            });
        }

        Ok(Self { api, ice_servers })
    }

    /// Create a peer connection for one participant.
    pub async fn create_peer_connection(&self) -> webrtc::error::Result<Arc<RTCPeerConnection>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        Ok(Arc::new(self.api.new_peer_connection(config).await?))
    }

    /// Apply the remote offer and produce a complete local answer.
    ///
    /// Suspends until ICE candidate gathering finishes so the answer
    /// already carries every candidate.
    pub async fn negotiate(
        &self,
        peer_connection: &RTCPeerConnection,
        offer: RTCSessionDescription,
    ) -> webrtc::error::Result<RTCSessionDescription> {
        peer_connection.set_remote_description(offer).await?;

        let answer = peer_connection.create_answer(None).await?;

        let mut gather_complete = peer_connection.gathering_complete_promise().await;
        peer_connection.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        peer_connection
            .local_description()
            .await
            .ok_or_else(|| webrtc::Error::new("local description missing after gathering".to_owned()))
    }
}
