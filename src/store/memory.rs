// In-memory credential store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CredentialStore, StoreMode, TokenPair};
use crate::error::AuthError;

/// Volatile credential store. Tokens never leave process memory, so this
/// backing reports `StoreMode::Secure`; everything is lost on process exit.
pub struct MemoryCredentialStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(None),
        }
    }

    /// Start out already holding a token pair. Used by tests and by hosts
    /// that obtain credentials before constructing the controller.
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_expiry(&self) -> Option<DateTime<Utc>> {
        self.tokens.read().await.as_ref().map(|t| t.expires_at)
    }

    async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    async fn put(&self, tokens: TokenPair) -> Result<(), AuthError> {
        debug!("Storing token pair expiring at {}", tokens.expires_at);
        *self.tokens.write().await = Some(tokens);
        Ok(())
    }

    async fn clear(&self) {
        *self.tokens.write().await = None;
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Secure
    }
}
