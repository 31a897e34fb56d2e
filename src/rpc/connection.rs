//! Per-peer connection state: inbound method table, outbound queue and
//! close notification.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::error::RpcError;
use crate::ws::messages::WsMessage;

/// Unique identifier of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Creates a new random `ConnectionId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of an inbound call.
pub type HandlerResult = Result<Value, RpcError>;

/// Inbound method implementation, shared between connections.
pub type Handler = Arc<dyn Fn(CallContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

type CloseListener = Box<dyn FnOnce(ConnectionId) -> BoxFuture<'static, ()> + Send>;

/// Wraps an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// What a handler receives: the calling connection and positional arguments.
#[derive(Clone)]
pub struct CallContext {
    /// Connection the call arrived on.
    pub connection: Arc<Connection>,
    /// Positional arguments as sent by the client.
    pub args: Vec<Value>,
}

impl CallContext {
    /// Decodes argument `index`. Missing arguments decode from `null`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidArguments`] if the value does not match `T`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, RpcError> {
        let value = self.args.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| RpcError::InvalidArguments(format!("argument {index}: {e}")))
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("connection", &self.connection.id())
            .field("args", &self.args)
            .finish()
    }
}

/// A bidirectional channel to one remote peer.
///
/// Handlers registered here are visible to this peer only; the shared
/// anonymous surface lives in the service registry. Close listeners run
/// exactly once, when the transport calls [`Connection::close`].
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<WsMessage>,
    methods: RwLock<HashMap<String, Handler>>,
    close_listeners: Mutex<Vec<CloseListener>>,
    closed: AtomicBool,
}

impl Connection {
    /// Creates a connection that queues outbound envelopes on `outbound`.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<WsMessage>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            outbound,
            methods: RwLock::new(HashMap::new()),
            close_listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` once [`Connection::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Registers a handler for this peer, replacing any previous one.
    pub async fn register_method(&self, name: impl Into<String>, handler: Handler) {
        self.methods.write().await.insert(name.into(), handler);
    }

    /// Registers a batch of handlers under a single write lock.
    ///
    /// Concurrent lookups see either none or all of the batch.
    pub async fn register_methods<I>(&self, batch: I)
    where
        I: IntoIterator<Item = (String, Handler)>,
    {
        // built before the lock is taken
        #[allow(clippy::needless_collect)]
        let batch: Vec<_> = batch.into_iter().collect();
        self.methods.write().await.extend(batch);
    }

    /// Looks up a handler registered on this connection.
    pub async fn method(&self, name: &str) -> Option<Handler> {
        self.methods.read().await.get(name).map(Arc::clone)
    }

    /// Returns the names of all connection-local handlers, sorted.
    pub async fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a stub that invokes `namespace.method` on the remote peer.
    #[must_use]
    pub fn client_function(&self, namespace: &str, method: &str) -> ClientFunction {
        ClientFunction {
            connection_id: self.id,
            method: format!("{namespace}.{method}"),
            outbound: self.outbound.clone(),
        }
    }

    /// Registers a listener fired when the connection closes.
    ///
    /// If the connection is already closed the listener runs immediately,
    /// so a registration racing a disconnect is never lost.
    pub async fn on_closed<F, Fut>(&self, listener: F)
    where
        F: FnOnce(ConnectionId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: CloseListener = Box::new(move |id| Box::pin(listener(id)));
        let mut listeners = self.close_listeners.lock().await;
        if self.is_closed() {
            drop(listeners);
            listener(self.id).await;
            return;
        }
        listeners.push(listener);
    }

    /// Marks the connection closed and runs every close listener once.
    ///
    /// Later calls are no-ops.
    pub async fn close(&self) {
        let listeners = {
            let mut guard = self.close_listeners.lock().await;
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *guard)
        };
        for listener in listeners {
            listener(self.id).await;
        }
        tracing::debug!(connection_id = %self.id, "connection closed");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Fire-and-forget stub bound to one connection and one client method.
#[derive(Debug, Clone)]
pub struct ClientFunction {
    connection_id: ConnectionId,
    method: String,
    outbound: mpsc::Sender<WsMessage>,
}

impl ClientFunction {
    /// Connection this stub delivers to.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Fully-qualified client method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Queues a push envelope without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DeliveryFailed`] if the outbound queue is full
    /// or the transport has gone away.
    pub fn invoke(&self, args: Vec<Value>) -> Result<(), RpcError> {
        self.outbound
            .try_send(WsMessage::push(self.method.clone(), args))
            .map_err(|e| {
                let reason = match e {
                    TrySendError::Full(_) => "outbound queue full",
                    TrySendError::Closed(_) => "connection closed",
                };
                RpcError::DeliveryFailed {
                    connection_id: self.connection_id,
                    method: self.method.clone(),
                    reason: reason.to_string(),
                }
            })
    }
}
