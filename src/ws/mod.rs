//! WebSocket layer: upgrade handler, per-socket loop and wire envelope.
//!
//! The endpoint at `/ws` carries JSON envelopes in both directions:
//! client calls with their responses, and server pushes.

pub mod connection;
pub mod handler;
pub mod messages;
