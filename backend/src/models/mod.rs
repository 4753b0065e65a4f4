//! Data models shared across the session directory, the orchestrator and the
//! API handlers.

pub mod credential;
pub mod participant;
pub mod user;
pub mod video_session;
