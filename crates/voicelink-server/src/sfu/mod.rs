//! SFU (Selective Forwarding Unit) core for the shared room.
//!
//! Each participant sends one upstream audio track; the relay forwards
//! it to every other participant without processing or transcoding.
//! The registry holds all membership state, the fan-out coordinator
//! moves packets, and the lifecycle manager cleans up.

pub mod fanout;
pub mod lifecycle;
pub mod registry;

pub use registry::{ParticipantState, RemovedParticipant, Room};
