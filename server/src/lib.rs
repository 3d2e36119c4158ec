//! GATHER realtime delivery server.
//!
//! Library form of the server so the integration tests in `tests/` can
//! assemble and boot it in-process; the deployable binary lives in main.rs.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod notifications;
pub mod routes;
pub mod state;
pub mod ws;
