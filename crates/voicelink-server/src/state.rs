use crate::engine::TransportEngine;
use crate::sfu::Room;
use std::sync::Arc;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
}

#[derive(Clone)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:4000".to_string());

        let stun_servers = std::env::var("STUN_SERVERS")
            .map(|s| s.split(',').map(String::from).collect())
            .unwrap_or_else(|_| vec!["stun:stun.l.google.com:19302".to_string()]);

        // TURN_SERVERS="turn:host:3478,user,secret;turn:other:3478,user,secret"
        let turn_servers = std::env::var("TURN_SERVERS")
            .map(|s| {
                s.split(';')
                    .filter_map(|entry| {
                        let mut parts = entry.splitn(3, ',');
                        Some(TurnServer {
                            url: parts.next()?.to_string(),
                            username: parts.next()?.to_string(),
                            credential: parts.next()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            bind_address,
            stun_servers,
            turn_servers,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<TransportEngine>,
    pub room: Arc<Room>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let engine = Arc::new(TransportEngine::new(
            config.stun_servers.clone(),
            config.turn_servers.clone(),
        )?);
        let room = Arc::new(Room::new());

        Ok(Self {
            config,
            engine,
            room,
        })
    }
}
