//! Service layer: client sessions, authentication and change delivery.
//!
//! [`ClientManager`] is the entry point. It owns the [`ServiceRegistry`],
//! the session table and the update queue, and hands out the
//! [`EntityChangeBroadcaster`] that feeds world events to clients.

pub mod auth;
pub mod broadcaster;
pub mod client_manager;
pub mod registry;
pub mod sessions;
pub mod update_queue;

pub use auth::{Authenticator, OpenAuthenticator, StaticAuthenticator};
pub use broadcaster::EntityChangeBroadcaster;
pub use client_manager::{AuthenticatedCallback, BackgroundTasks, ClientManager};
pub use registry::ServiceRegistry;
pub use sessions::{ClientStubs, DeliveryReport, Sessions};
pub use update_queue::{ClientUpdateQueue, FlushReport, PendingUpdateBuffer, UpdateInfo};
