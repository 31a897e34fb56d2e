//! Name-keyed client service registry.
//!
//! Methods registered without authentication land on the shared anonymous
//! surface that every connection can call. Methods requiring
//! authentication are held back and copied onto a connection, as one
//! batch, when that connection logs in.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::rpc::{Connection, Handler};

#[derive(Default)]
struct RegistryState {
    /// Namespaces discoverable before authentication.
    basic_services: HashSet<String>,
    /// Every registered namespace, discoverable after authentication.
    authenticated_services: HashSet<String>,
    /// Shared surface callable by any connection.
    shared_methods: HashMap<String, Handler>,
    /// Withheld until a connection authenticates.
    authenticated_methods: HashMap<String, Handler>,
}

/// Registry of client-callable services and their authentication rules.
#[derive(Default)]
pub struct ServiceRegistry {
    state: RwLock<RegistryState>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every method of `methods` as `namespace.method`.
    ///
    /// Repeated registrations of a namespace accumulate methods. A
    /// namespace registered without authentication is discoverable through
    /// [`ServiceRegistry::implements`]; every namespace is discoverable
    /// through [`ServiceRegistry::authenticated_implements`].
    pub async fn register_service<I>(&self, namespace: &str, requires_auth: bool, methods: I)
    where
        I: IntoIterator<Item = (String, Handler)>,
    {
        let mut state = self.state.write().await;
        for (method, handler) in methods {
            let name = format!("{namespace}.{method}");
            insert_method(&mut state, name, requires_auth, handler);
        }
        if !requires_auth {
            state.basic_services.insert(namespace.to_string());
        }
        state.authenticated_services.insert(namespace.to_string());
        tracing::debug!(namespace, requires_auth, "client service registered");
    }

    /// Registers a single method under its fully-qualified name.
    pub async fn register_method(&self, name: &str, requires_auth: bool, handler: Handler) {
        let mut state = self.state.write().await;
        insert_method(&mut state, name.to_string(), requires_auth, handler);
    }

    /// Answers, per name, whether the namespace is available anonymously.
    pub async fn implements(&self, services: &[String]) -> Vec<bool> {
        let state = self.state.read().await;
        services
            .iter()
            .map(|s| state.basic_services.contains(s))
            .collect()
    }

    /// Answers, per name, whether the namespace is registered at all.
    pub async fn authenticated_implements(&self, services: &[String]) -> Vec<bool> {
        let state = self.state.read().await;
        services
            .iter()
            .map(|s| state.authenticated_services.contains(s))
            .collect()
    }

    /// Returns a copy of every authentication-gated method.
    pub async fn authenticated_methods(&self) -> Vec<(String, Handler)> {
        self.state
            .read()
            .await
            .authenticated_methods
            .iter()
            .map(|(name, h)| (name.clone(), Arc::clone(h)))
            .collect()
    }

    /// Resolves `name` for `connection`.
    ///
    /// Connection-local handlers win over the shared surface, so a method
    /// registered both ways switches implementation after login.
    pub async fn resolve(&self, connection: &Connection, name: &str) -> Option<Handler> {
        if let Some(handler) = connection.method(name).await {
            return Some(handler);
        }
        self.state
            .read()
            .await
            .shared_methods
            .get(name)
            .map(Arc::clone)
    }
}

fn insert_method(state: &mut RegistryState, name: String, requires_auth: bool, handler: Handler) {
    if requires_auth {
        state.authenticated_methods.insert(name, handler);
    } else {
        state.shared_methods.insert(name, handler);
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry").finish_non_exhaustive()
    }
}
