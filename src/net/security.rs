//! Authentication provider seam.
//!
//! When the server runs secured, every CONNECT must pass the configured
//! [`AuthProvider`] before the session is accepted. Providers are async so
//! implementations can call out to external systems; the bundled
//! [`StaticAuthProvider`] answers from the config's user table.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("server is secured but no authentication provider is configured")]
    MissingProvider,
}

pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SecurityError>> + Send + 'a>>;

/// Validates the `login`/`passcode` headers of a CONNECT frame.
pub trait AuthProvider: Send + Sync {
    fn authenticate<'a>(&'a self, login: Option<&'a str>, passcode: Option<&'a str>)
        -> AuthFuture<'a>;
}

/// Config-backed provider: a fixed login/passcode table.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthProvider {
    users: HashMap<String, String>,
}

impl StaticAuthProvider {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl AuthProvider for StaticAuthProvider {
    fn authenticate<'a>(
        &'a self,
        login: Option<&'a str>,
        passcode: Option<&'a str>,
    ) -> AuthFuture<'a> {
        Box::pin(async move {
            let (Some(login), Some(passcode)) = (login, passcode) else {
                return Err(SecurityError::AuthenticationFailed);
            };
            match self.users.get(login) {
                Some(expected) if expected == passcode => Ok(()),
                _ => Err(SecurityError::AuthenticationFailed),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticAuthProvider {
        let mut users = HashMap::new();
        users.insert("alice".to_string(), "secret".to_string());
        StaticAuthProvider::new(users)
    }

    #[tokio::test]
    async fn test_valid_credentials() {
        assert_eq!(
            provider().authenticate(Some("alice"), Some("secret")).await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_invalid_credentials() {
        let p = provider();
        assert_eq!(
            p.authenticate(Some("alice"), Some("wrong")).await,
            Err(SecurityError::AuthenticationFailed)
        );
        assert_eq!(
            p.authenticate(Some("bob"), Some("secret")).await,
            Err(SecurityError::AuthenticationFailed)
        );
        assert_eq!(
            p.authenticate(None, None).await,
            Err(SecurityError::AuthenticationFailed)
        );
    }
}
