//! The API layer: the WebSocket endpoint, routing, and the listener.

pub mod router;
pub mod socket;

pub use router::{create_router, serve};
