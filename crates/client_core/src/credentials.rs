//! Access and refresh credentials. The engine reads them but does not
//! decide where they live; embedders plug in their own [`CredentialStore`].

use async_trait::async_trait;
use tokio::sync::RwLock;

const BEARER_PREFIX: &str = "Bearer ";

/// Removes a leading `Bearer ` scheme if present.
pub fn strip_bearer(token: &str) -> &str {
    token.strip_prefix(BEARER_PREFIX).unwrap_or(token).trim()
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Short-lived access credential without the `Bearer ` scheme. `None`
    /// means "not signed in", never an error.
    async fn access_token(&self) -> Option<String>;
    async fn refresh_token(&self) -> Option<String>;
    async fn store(&self, access_token: &str, refresh_token: &str);
    async fn clear(&self);
}

#[derive(Debug, Default, Clone)]
struct Credentials {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Session-scoped store; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    inner: RwLock<Credentials>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access_token: &str, refresh_token: &str) -> Self {
        Self {
            inner: RwLock::new(Credentials {
                access_token: non_empty(strip_bearer(access_token)),
                refresh_token: non_empty(refresh_token),
            }),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[async_trait]
impl CredentialStore for InMemoryCredentials {
    async fn access_token(&self) -> Option<String> {
        self.inner.read().await.access_token.clone()
    }

    async fn refresh_token(&self) -> Option<String> {
        self.inner.read().await.refresh_token.clone()
    }

    async fn store(&self, access_token: &str, refresh_token: &str) {
        let mut guard = self.inner.write().await;
        guard.access_token = non_empty(strip_bearer(access_token));
        guard.refresh_token = non_empty(refresh_token);
    }

    async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.access_token = None;
        guard.refresh_token = None;
    }
}
