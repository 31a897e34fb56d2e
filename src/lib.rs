//! # world-gateway
//!
//! WebSocket RPC gateway that authenticates clients and keeps them in sync
//! with a shared world of entities.
//!
//! Clients connect anonymously and see a small method surface
//! (`kiara.implements`, `auth.login`, `getTime`). After a successful
//! `auth.login` the connection gains every auth-gated method and starts
//! receiving `objectsync.*` pushes: new entities, removed entities and
//! batched attribute updates flushed on a fixed tick.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket RPC, HTTP)
//!     │
//!     ├── WS Handler (ws/)          REST Handlers (api/)
//!     │
//!     ├── Connection + ClientFunction (rpc/)
//!     │
//!     ├── ClientManager (service/)
//!     │     ├── ServiceRegistry
//!     │     ├── Sessions + ClientUpdateQueue
//!     │     └── EntityChangeBroadcaster
//!     │
//!     ├── EventBus (domain/)
//!     └── World (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod rpc;
pub mod service;
pub mod ws;
