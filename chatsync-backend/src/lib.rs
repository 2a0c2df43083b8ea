//! `ChatSync` development backend.
//!
//! An in-memory axum server speaking the same REST and WebSocket protocol the
//! client expects: bearer-authenticated message endpoints and a `/ws` socket
//! carrying JSON event frames. Used by the integration tests and for local
//! runs of the CLI.

pub mod config;
pub mod routes;
pub mod socket;
pub mod state;
