//! Session orchestration backend for live virtual classes.
//!
//! The HTTP surface (token issuance and the session directory) lives in
//! [`app`] and [`handlers`]; the client-side join/leave lifecycle lives in
//! [`services::orchestrator`].

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;
pub mod types;
pub mod utils;
