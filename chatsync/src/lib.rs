//! `ChatSync`: real-time message synchronization core for the marketplace
//! client.
//!
//! Reconciles optimistic local message state with server-confirmed state,
//! deduplicates messages arriving over the socket and REST paths, replays
//! sends that failed while offline, and keeps events scoped to the open
//! conversation.

pub mod api;
pub mod chat;
pub mod client;
pub mod config;
pub mod credential;
pub mod transport;
