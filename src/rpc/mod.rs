//! RPC substrate: connections, name-keyed handlers and client-bound stubs.
//!
//! A [`Connection`] is transport-neutral. It owns a table of inbound
//! handlers registered for that peer only and a bounded outbound queue of
//! envelopes that the transport (see [`crate::ws`]) drains to the socket.

pub mod connection;

pub use connection::{
    CallContext, ClientFunction, Connection, ConnectionId, Handler, HandlerResult, handler,
};
