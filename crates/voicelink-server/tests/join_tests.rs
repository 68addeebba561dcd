//! Signaling surface tests: offer in, answer out.
//!
//! The client side of the exchange is built with the same WebRTC
//! stack, so negotiation stays entirely local.
//!
//! Run with: cargo test -p voicelink-server --test join_tests

use reqwest::Client;
use std::time::Duration;
use voicelink_server::api::create_router;
use voicelink_server::engine::TransportEngine;
use voicelink_server::state::{AppState, Config};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

struct TestServer {
    addr: std::net::SocketAddr,
    state: AppState,
}

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        let config = Config {
            bind_address: "127.0.0.1:0".to_string(),
            stun_servers: vec![],
            turn_servers: vec![],
        };

        let state = AppState::new(config)?;
        let router = create_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(Self { addr, state })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Build a complete offer the way a publishing client would.
async fn client_offer() -> String {
    let engine = TransportEngine::new(vec![], vec![]).expect("client engine");
    let pc = engine
        .create_peer_connection()
        .await
        .expect("client peer connection");
    pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
        .await
        .expect("audio transceiver");

    let offer = pc.create_offer(None).await.expect("create offer");
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.expect("set local description");
    let _ = gather_complete.recv().await;

    let local = pc
        .local_description()
        .await
        .expect("local description after gathering");
    serde_json::to_string(&local).expect("serialize offer")
}

#[tokio::test]
async fn health_check_responds() {
    let server = TestServer::start().await.expect("server");

    let body = Client::new()
        .get(server.url("/health"))
        .send()
        .await
        .expect("request")
        .text()
        .await
        .expect("body");

    assert_eq!(body, "OK");
}

#[tokio::test]
async fn malformed_offer_is_rejected_without_state() {
    let server = TestServer::start().await.expect("server");

    let response = Client::new()
        .post(server.url("/sdp"))
        .body("this is not a session description")
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 400);
    assert!(server.state.room.participant_ids().await.is_empty());
}

#[tokio::test]
async fn unparseable_sdp_leaves_no_partial_state() {
    let server = TestServer::start().await.expect("server");

    // Deserializes as a session description but fails negotiation.
    let response = Client::new()
        .post(server.url("/sdp"))
        .body(r#"{"type":"offer","sdp":"garbage"}"#)
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 502);
    assert!(server.state.room.participant_ids().await.is_empty());
    assert!(server.state.room.track_ids().await.is_empty());
}

#[tokio::test]
async fn join_returns_answer_and_registers_participant() {
    let server = TestServer::start().await.expect("server");

    let response = Client::new()
        .post(server.url("/sdp"))
        .body(client_offer().await)
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.expect("json body");
    let participant_id = body["participant_id"].as_str().expect("participant id");
    assert_eq!(body["answer"]["type"], "answer");
    assert!(!body["answer"]["sdp"].as_str().unwrap_or_default().is_empty());

    let ids = server.state.room.participant_ids().await;
    assert_eq!(ids.len(), 1);
    assert_eq!(
        ids.iter().next().map(ToString::to_string).as_deref(),
        Some(participant_id)
    );
}

#[tokio::test]
async fn two_participants_can_join_independently() {
    let server = TestServer::start().await.expect("server");
    let client = Client::new();

    for _ in 0..2 {
        let response = client
            .post(server.url("/sdp"))
            .body(client_offer().await)
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 200);
    }

    assert_eq!(server.state.room.participant_ids().await.len(), 2);
}
