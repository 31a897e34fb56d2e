//! Client manager: authentication gate, service surface and background
//! delivery tasks.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::auth::Authenticator;
use super::broadcaster::EntityChangeBroadcaster;
use super::registry::ServiceRegistry;
use super::sessions::{ClientStubs, OBJECTSYNC, Sessions};
use super::update_queue::FlushReport;
use crate::domain::{EntitySnapshot, World};
use crate::error::{GatewayError, RpcError};
use crate::rpc::{CallContext, Connection, ConnectionId, Handler, HandlerResult, handler};

/// Callback fired when any connection authenticates.
pub type AuthenticatedCallback = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Owns the client-facing service surface and every per-connection table.
///
/// There is one per running server. Feature modules extend the surface
/// through [`ClientManager::register_client_service`] and
/// [`ClientManager::register_client_method`].
///
/// Connection lifecycle: anonymous → authenticating → authenticated, and
/// from anonymous or authenticated to disconnected. There is no way back
/// from authenticated to anonymous.
pub struct ClientManager {
    registry: ServiceRegistry,
    sessions: Arc<Mutex<Sessions>>,
    world: Arc<World>,
    authenticator: Arc<dyn Authenticator>,
    on_authenticated: RwLock<Vec<AuthenticatedCallback>>,
}

impl ClientManager {
    /// Creates the manager, registers the built-in services
    /// (`kiara`, `auth`, `getTime`, `objectsync`) and subscribes its
    /// [`EntityChangeBroadcaster`] to `world`.
    pub async fn new(world: Arc<World>, authenticator: Arc<dyn Authenticator>) -> Arc<Self> {
        let manager = Arc::new(Self {
            registry: ServiceRegistry::new(),
            sessions: Arc::new(Mutex::new(Sessions::new())),
            world,
            authenticator,
            on_authenticated: RwLock::new(Vec::new()),
        });
        manager.register_client_services().await;
        let broadcaster = EntityChangeBroadcaster::new(Arc::clone(&manager.sessions));
        manager.world.subscribe(Arc::new(broadcaster)).await;
        manager
    }

    async fn register_client_services(self: &Arc<Self>) {
        self.register_client_service("kiara", false, Vec::new()).await;
        self.register_client_method(
            "kiara.implements",
            false,
            self.bind(|manager, ctx| async move {
                let services: Vec<String> = ctx.arg(0)?;
                Ok(Value::from(manager.implements(&services).await))
            }),
        )
        .await;
        self.register_client_method(
            "kiara.implements",
            true,
            self.bind(|manager, ctx| async move {
                let services: Vec<String> = ctx.arg(0)?;
                Ok(Value::from(manager.authenticated_implements(&services).await))
            }),
        )
        .await;

        let login = self.bind(|manager, ctx| async move {
            let login: String = ctx.arg(0)?;
            let password: String = ctx.arg(1)?;
            let accepted = manager
                .authenticate(&ctx.connection, &login, &password)
                .await?;
            Ok(Value::Bool(accepted))
        });
        self.register_client_service("auth", false, vec![("login".to_string(), login)])
            .await;

        self.register_client_method(
            "getTime",
            false,
            handler(|_ctx| async move { Ok(serde_json::to_value(Utc::now())?) }),
        )
        .await;

        let list_objects = self.bind(|manager, _ctx| async move {
            Ok(serde_json::to_value(manager.list_objects().await)?)
        });
        self.register_client_service(
            OBJECTSYNC,
            true,
            vec![("listObjects".to_string(), list_objects)],
        )
        .await;
    }

    /// Wraps a handler that needs the manager without keeping it alive.
    fn bind<F, Fut>(self: &Arc<Self>, f: F) -> Handler
    where
        F: Fn(Arc<Self>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        handler(move |ctx| {
            let call = weak.upgrade().map(|manager| f(manager, ctx));
            async move {
                match call {
                    Some(call) => call.await,
                    None => Err(RpcError::Unavailable),
                }
            }
        })
    }

    /// Registers every method of `methods` as `namespace.method`.
    pub async fn register_client_service<I>(&self, namespace: &str, requires_auth: bool, methods: I)
    where
        I: IntoIterator<Item = (String, Handler)>,
    {
        self.registry
            .register_service(namespace, requires_auth, methods)
            .await;
    }

    /// Registers a single method under its fully-qualified name.
    ///
    /// Methods that require authentication become callable on a
    /// connection only once it logs in; connections already authenticated
    /// do not pick them up.
    pub async fn register_client_method(&self, name: &str, requires_auth: bool, handler: Handler) {
        self.registry
            .register_method(name, requires_auth, handler)
            .await;
    }

    /// Calls `callback` with each connection that authenticates from now on.
    pub async fn notify_when_any_client_authenticated<F>(&self, callback: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_authenticated.write().await.push(Arc::new(callback));
    }

    /// Verifies credentials and promotes `connection` to authenticated.
    ///
    /// On success the connection joins the authenticated set together with
    /// its push stubs and update buffer, gets a disconnect listener, the
    /// authentication callbacks fire, and every gated method is registered
    /// on it as one batch. Wrong credentials return `Ok(false)` and change
    /// nothing. A connection that closes before the login completes is
    /// torn down again and the call returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AlreadyAuthenticated`] if the connection is
    /// already authenticated or another login on it is in flight.
    pub async fn authenticate(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
        login: &str,
        password: &str,
    ) -> Result<bool, GatewayError> {
        let connection_id = connection.id();
        self.sessions
            .lock()
            .await
            .begin_authentication(connection_id)?;

        if !self.authenticator.authenticate(login, password) {
            self.sessions
                .lock()
                .await
                .abort_authentication(connection_id);
            tracing::info!(%connection_id, login, "authentication failed");
            return Ok(false);
        }

        self.sessions
            .lock()
            .await
            .complete_authentication(ClientStubs::for_connection(connection));

        let weak = Arc::downgrade(self);
        connection
            .on_closed(move |id| async move {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_disconnect(id).await;
                }
            })
            .await;
        if connection.is_closed() {
            tracing::debug!(%connection_id, login, "connection closed during login");
            return Ok(false);
        }

        let callbacks = self.on_authenticated.read().await.clone();
        for callback in &callbacks {
            callback(connection);
        }

        connection
            .register_methods(self.registry.authenticated_methods().await)
            .await;

        tracing::info!(%connection_id, login, "client authenticated");
        Ok(true)
    }

    /// Tears down every per-connection table for `connection_id`.
    ///
    /// Returns `true` if the connection was authenticated.
    pub async fn handle_disconnect(&self, connection_id: ConnectionId) -> bool {
        let removed = self.sessions.lock().await.remove(connection_id);
        if removed {
            tracing::info!(%connection_id, "authenticated client disconnected");
        }
        removed
    }

    /// Routes a call from `connection` to its handler.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::MethodNotFound`] if nothing visible to this
    /// connection is registered under `method`, or whatever the handler
    /// fails with.
    pub async fn dispatch(
        &self,
        connection: &Arc<Connection>,
        method: &str,
        args: Vec<Value>,
    ) -> HandlerResult {
        let Some(handler) = self.registry.resolve(connection, method).await else {
            return Err(RpcError::MethodNotFound(method.to_string()));
        };
        tracing::debug!(connection_id = %connection.id(), method, "dispatching call");
        handler(CallContext {
            connection: Arc::clone(connection),
            args,
        })
        .await
    }

    /// Namespaces available without authentication, per queried name.
    pub async fn implements(&self, services: &[String]) -> Vec<bool> {
        self.registry.implements(services).await
    }

    /// Every registered namespace, per queried name.
    pub async fn authenticated_implements(&self, services: &[String]) -> Vec<bool> {
        self.registry.authenticated_implements(services).await
    }

    /// Snapshots of every entity currently in the world.
    ///
    /// This is how a client catches up on entities that existed before it
    /// authenticated.
    pub async fn list_objects(&self) -> Vec<EntitySnapshot> {
        self.world.snapshots().await
    }

    /// Delivers every pending update batch now.
    pub async fn flush_updates(&self) -> FlushReport {
        self.sessions.lock().await.flush_updates()
    }

    /// Starts the update flush ticker.
    ///
    /// Entity pushes need no task; they are sent from inside the world
    /// mutation. Call once per server.
    #[must_use]
    pub fn spawn(&self, update_interval: Duration) -> BackgroundTasks {
        let sessions = Arc::clone(&self.sessions);
        let period = update_interval.max(Duration::from_millis(1));
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let report = sessions.lock().await.flush_updates();
                if report.updates > 0 {
                    tracing::trace!(
                        updates = report.updates,
                        delivered = report.delivered,
                        failed = report.failed,
                        "update batches flushed"
                    );
                }
            }
        });

        BackgroundTasks { ticker }
    }

    /// Number of authenticated connections.
    pub async fn authenticated_count(&self) -> usize {
        self.sessions.lock().await.authenticated_count()
    }

    /// Returns `true` if `connection_id` is authenticated.
    pub async fn is_authenticated(&self, connection_id: ConnectionId) -> bool {
        self.sessions.lock().await.is_authenticated(connection_id)
    }

    /// Returns `true` if push stubs are installed for `connection_id`.
    pub async fn has_push_handlers(&self, connection_id: ConnectionId) -> bool {
        self.sessions.lock().await.has_push_handlers(connection_id)
    }

    /// The world this manager synchronizes clients with.
    #[must_use]
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }
}

impl fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientManager")
            .field("registry", &self.registry)
            .field("authenticator", &self.authenticator)
            .finish_non_exhaustive()
    }
}

/// Handle of the task started by [`ClientManager::spawn`].
#[derive(Debug)]
pub struct BackgroundTasks {
    ticker: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Stops the flush ticker.
    pub fn shutdown(self) {
        self.ticker.abort();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{AttributeWrite, ComponentDefinition};
    use crate::service::auth::{OpenAuthenticator, StaticAuthenticator};
    use crate::ws::messages::WsMessage;
    use futures_util::FutureExt;
    use serde_json::json;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Harness {
        manager: Arc<ClientManager>,
        world: Arc<World>,
    }

    impl Harness {
        async fn new() -> Self {
            let world = Arc::new(World::new());
            let def = ComponentDefinition::new("location").with_attribute("x", json!(0.0));
            let Ok(()) = world.register_component(def).await else {
                panic!("definition should register");
            };
            let auth = Arc::new(StaticAuthenticator::new([("alice", "pw"), ("bob", "pw")]));
            let manager = ClientManager::new(Arc::clone(&world), auth).await;
            Self { manager, world }
        }

        async fn login(&self, conn: &Arc<Connection>, login: &str) {
            let Ok(true) = self.manager.authenticate(conn, login, "pw").await else {
                panic!("login should succeed");
            };
        }
    }

    fn connection() -> (Arc<Connection>, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(32);
        (Connection::new(tx), rx)
    }

    fn names(list: &[&str]) -> Value {
        json!(list)
    }

    async fn call(manager: &ClientManager, conn: &Arc<Connection>, method: &str, args: Vec<Value>) -> Value {
        match manager.dispatch(conn, method, args).await {
            Ok(value) => value,
            Err(e) => panic!("{method} failed: {e}"),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<WsMessage>) -> Vec<WsMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn anonymous_surface_hides_gated_services() {
        let h = Harness::new().await;
        let (conn, _rx) = connection();

        let answer = call(
            &h.manager,
            &conn,
            "kiara.implements",
            vec![names(&["kiara", "auth", "objectsync", "editing"])],
        )
        .await;
        assert_eq!(answer, json!([true, true, false, false]));

        let listed = h.manager.dispatch(&conn, "objectsync.listObjects", Vec::new()).await;
        assert!(matches!(listed, Err(RpcError::MethodNotFound(_))));
    }

    #[tokio::test]
    async fn login_switches_to_authenticated_surface() {
        let h = Harness::new().await;
        let (conn, _rx) = connection();

        let ok = call(&h.manager, &conn, "auth.login", vec![json!("alice"), json!("pw")]).await;
        assert_eq!(ok, json!(true));

        let answer = call(
            &h.manager,
            &conn,
            "kiara.implements",
            vec![names(&["kiara", "auth", "objectsync", "editing"])],
        )
        .await;
        assert_eq!(answer, json!([true, true, true, false]));
        assert_eq!(call(&h.manager, &conn, "objectsync.listObjects", Vec::new()).await, json!([]));
    }

    #[tokio::test]
    async fn failed_login_changes_nothing() {
        let h = Harness::new().await;
        let (conn, _rx) = connection();

        let ok = call(&h.manager, &conn, "auth.login", vec![json!("alice"), json!("nope")]).await;
        assert_eq!(ok, json!(false));
        assert!(!h.manager.is_authenticated(conn.id()).await);
        assert!(!h.manager.has_push_handlers(conn.id()).await);
        assert!(conn.method_names().await.is_empty());

        // a later correct login still works
        h.login(&conn, "alice").await;
        assert!(h.manager.is_authenticated(conn.id()).await);
    }

    #[tokio::test]
    async fn second_login_is_rejected() {
        let h = Harness::new().await;
        let (conn, _rx) = connection();
        h.login(&conn, "alice").await;

        let again = h.manager.authenticate(&conn, "alice", "pw").await;
        assert!(matches!(again, Err(GatewayError::AlreadyAuthenticated(_))));

        let via_rpc = h
            .manager
            .dispatch(&conn, "auth.login", vec![json!("alice"), json!("pw")])
            .await;
        assert!(via_rpc.is_err_and(|e| e.error_code() == 2003));
        assert_eq!(h.manager.authenticated_count().await, 1);
    }

    #[tokio::test]
    async fn login_arguments_are_validated() {
        let h = Harness::new().await;
        let (conn, _rx) = connection();
        let result = h.manager.dispatch(&conn, "auth.login", vec![json!(42)]).await;
        assert!(matches!(result, Err(RpcError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn get_time_is_anonymous() {
        let h = Harness::new().await;
        let (conn, _rx) = connection();
        let value = call(&h.manager, &conn, "getTime", Vec::new()).await;
        assert!(value.is_string());
    }

    #[tokio::test]
    async fn authenticated_callbacks_fire_before_login_returns() {
        let h = Harness::new().await;
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        h.manager
            .notify_when_any_client_authenticated(move |_conn| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let (conn, _rx) = connection();
        h.login(&conn, "alice").await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let (other, _other_rx) = connection();
        let _ = h.manager.authenticate(&other, "alice", "wrong").await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gated_methods_registered_later_are_picked_up_by_new_logins() {
        let h = Harness::new().await;
        let (early, _early_rx) = connection();
        h.login(&early, "alice").await;

        h.manager
            .register_client_service(
                "editing",
                true,
                vec![(
                    "ping".to_string(),
                    handler(|_ctx| async move { Ok(json!("pong")) }),
                )],
            )
            .await;

        let (late, _late_rx) = connection();
        h.login(&late, "bob").await;
        assert_eq!(call(&h.manager, &late, "editing.ping", Vec::new()).await, json!("pong"));
        assert!(h.manager.dispatch(&early, "editing.ping", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn disconnect_removes_every_table_entry() {
        let h = Harness::new().await;
        let (conn, _rx) = connection();
        h.login(&conn, "alice").await;
        assert!(h.manager.has_push_handlers(conn.id()).await);

        conn.close().await;
        assert!(!h.manager.is_authenticated(conn.id()).await);
        assert!(!h.manager.has_push_handlers(conn.id()).await);
        assert_eq!(h.manager.authenticated_count().await, 0);
    }

    #[tokio::test]
    async fn anonymous_disconnect_is_a_no_op() {
        let h = Harness::new().await;
        let (conn, _rx) = connection();
        conn.close().await;
        assert!(!h.manager.handle_disconnect(conn.id()).await);
    }

    #[tokio::test]
    async fn two_client_scenario() {
        let h = Harness::new().await;

        let (c1, mut rx1) = connection();
        h.login(&c1, "alice").await;

        let Ok(e1) = h
            .world
            .add_entity(vec![AttributeWrite::new("location", "x", json!(0.0))])
            .await
        else {
            panic!("entity should be created");
        };
        let pushes = drain(&mut rx1);
        assert_eq!(pushes.len(), 1);
        assert_eq!(
            pushes.first().map(|m| m.payload.clone()),
            Some(json!([{ "guid": e1.to_string(), "location": { "x": 0.0 } }]))
        );

        let (c2, mut rx2) = connection();
        h.login(&c2, "bob").await;
        let listed = call(&h.manager, &c2, "objectsync.listObjects", Vec::new()).await;
        assert_eq!(listed, json!([{ "guid": e1.to_string(), "location": { "x": 0.0 } }]));
        assert!(drain(&mut rx2).is_empty());

        for v in [1.0, 2.0] {
            let Ok(()) = h.world.set_attribute(e1, "location", "x", json!(v)).await else {
                panic!("write should succeed");
            };
            }
        let report = h.manager.flush_updates().await;
        assert_eq!(report.delivered, 2);
        let expected = json!([[{
            "entityGuid": e1.to_string(),
            "componentName": "location",
            "attributeName": "x",
            "value": 2.0
        }]]);
        for rx in [&mut rx1, &mut rx2] {
            let batch = drain(rx);
            assert_eq!(batch.len(), 1);
            assert_eq!(batch.first().map(|m| m.payload.clone()), Some(expected.clone()));
        }

        let Ok(_) = h.world.remove_entity(e1).await else {
            panic!("entity should be removed");
        };
        for rx in [&mut rx1, &mut rx2] {
            let removed = drain(rx);
            assert_eq!(removed.len(), 1);
            assert_eq!(
                removed.first().and_then(|m| m.method.clone()).as_deref(),
                Some("objectsync.removeObject")
            );
            assert_eq!(removed.first().map(|m| m.payload.clone()), Some(json!([e1.to_string()])));
        }

        c1.close().await;
        let Ok(e2) = h.world.add_entity(Vec::new()).await else {
            panic!("entity should be created");
        };
        assert!(drain(&mut rx1).is_empty());
        let pushes = drain(&mut rx2);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes.first().map(|m| m.payload.clone()), Some(json!([{ "guid": e2.to_string() }])));
    }

    #[tokio::test]
    async fn login_after_entity_added_sees_it_only_through_listing() {
        let h = Harness::new().await;
        let Ok(id) = h.world.add_entity(Vec::new()).await else {
            panic!("entity should be created");
        };

        let (late, mut rx) = connection();
        h.login(&late, "bob").await;
        let listed = call(&h.manager, &late, "objectsync.listObjects", Vec::new()).await;
        assert_eq!(listed, json!([{ "guid": id.to_string() }]));
        assert!(drain(&mut rx).is_empty());
    }

    #[derive(Debug, Default)]
    struct ClosesDuringCheck {
        target: OnceLock<Arc<Connection>>,
    }

    impl Authenticator for ClosesDuringCheck {
        fn authenticate(&self, _login: &str, _password: &str) -> bool {
            if let Some(conn) = self.target.get() {
                // no close listener is attached yet, so this completes at once
                let _ = conn.close().now_or_never();
            }
            true
        }
    }

    #[tokio::test]
    async fn close_during_credential_check_leaves_nothing_behind() {
        let auth = Arc::new(ClosesDuringCheck::default());
        let world = Arc::new(World::new());
        let manager = ClientManager::new(world, Arc::clone(&auth) as Arc<dyn Authenticator>).await;
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        manager
            .notify_when_any_client_authenticated(move |_conn| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let (conn, _rx) = connection();
        let _ = auth.target.set(Arc::clone(&conn));
        let result = manager.authenticate(&conn, "alice", "").await;

        assert!(conn.is_closed());
        assert!(matches!(result, Ok(false)));
        assert!(!manager.is_authenticated(conn.id()).await);
        assert!(!manager.has_push_handlers(conn.id()).await);
        assert_eq!(manager.authenticated_count().await, 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(conn.method_names().await.is_empty());
    }

    #[tokio::test]
    async fn login_on_already_closed_connection_is_torn_down() {
        let world = Arc::new(World::new());
        let manager = ClientManager::new(world, Arc::new(OpenAuthenticator)).await;
        let (conn, _rx) = connection();
        conn.close().await;

        let result = manager.authenticate(&conn, "alice", "").await;
        assert!(matches!(result, Ok(false)));
        assert!(!manager.is_authenticated(conn.id()).await);
        assert!(!manager.has_push_handlers(conn.id()).await);
        assert_eq!(manager.authenticated_count().await, 0);
    }

    #[tokio::test]
    async fn pending_updates_of_disconnected_client_are_discarded() {
        let h = Harness::new().await;
        let (conn, mut rx) = connection();
        h.login(&conn, "alice").await;
        let Ok(id) = h.world.add_entity(Vec::new()).await else {
            panic!("entity should be created");
        };
        let _ = drain(&mut rx);

        let Ok(()) = h.world.set_attribute(id, "location", "x", json!(9.0)).await else {
            panic!("write should succeed");
        };
        conn.close().await;

        assert_eq!(h.manager.flush_updates().await.updates, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn flush_ticker_delivers_batches() {
        let h = Harness::new().await;
        let tasks = h.manager.spawn(Duration::from_millis(5));
        let (conn, mut rx) = connection();
        h.login(&conn, "alice").await;

        let Ok(id) = h.world.add_entity(Vec::new()).await else {
            panic!("entity should be created");
        };
        let Ok(Some(added)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await else {
            panic!("new entity push expected");
        };
        assert_eq!(added.method.as_deref(), Some("objectsync.receiveNewObjects"));

        let Ok(()) = h.world.set_attribute(id, "location", "x", json!(3.0)).await else {
            panic!("write should succeed");
        };
        let Ok(Some(batch)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await else {
            panic!("update batch expected");
        };
        assert_eq!(batch.method.as_deref(), Some("objectsync.receiveObjectUpdates"));
        tasks.shutdown();
    }
}
