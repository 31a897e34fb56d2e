//! Credential verification backends.

use std::collections::HashMap;
use std::fmt;

/// Verifies a login/password pair.
///
/// Implementations must be cheap and non-blocking; they are called from
/// the `auth.login` handler on the connection's task.
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Returns `true` if the credentials are accepted.
    fn authenticate(&self, login: &str, password: &str) -> bool;
}

/// Accepts any non-empty login. Development default.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAuthenticator;

impl Authenticator for OpenAuthenticator {
    fn authenticate(&self, login: &str, _password: &str) -> bool {
        !login.trim().is_empty()
    }
}

/// Checks credentials against a fixed login → password table.
#[derive(Clone, Default)]
pub struct StaticAuthenticator {
    credentials: HashMap<String, String>,
}

impl StaticAuthenticator {
    /// Builds an authenticator from `(login, password)` pairs.
    #[must_use]
    pub fn new<I, L, P>(credentials: I) -> Self
    where
        I: IntoIterator<Item = (L, P)>,
        L: Into<String>,
        P: Into<String>,
    {
        Self {
            credentials: credentials
                .into_iter()
                .map(|(l, p)| (l.into(), p.into()))
                .collect(),
        }
    }

    /// Returns the number of known logins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Returns `true` if no login is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, login: &str, password: &str) -> bool {
        self.credentials
            .get(login)
            .is_some_and(|expected| expected == password)
    }
}

impl fmt::Debug for StaticAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print passwords
        f.debug_struct("StaticAuthenticator")
            .field("logins", &self.credentials.len())
            .finish()
    }
}
