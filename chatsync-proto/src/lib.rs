//! Shared wire definitions for `ChatSync`: message records, socket events,
//! REST bodies, and the JSON frame codec.

pub mod api;
pub mod codec;
pub mod events;
pub mod message;
