//! Voicelink Server Library
//!
//! This module exposes the relay components for testing and embedding.

pub mod api;
pub mod engine;
pub mod error;
pub mod sfu;
pub mod state;

use anyhow::Result;

/// Create and configure the relay application
pub fn create_app(config: state::Config) -> Result<axum::Router> {
    let app_state = state::AppState::new(config)?;
    Ok(api::create_router(app_state))
}
