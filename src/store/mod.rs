// Credential store capability
// Persists the current access/refresh token pair; the lifecycle logic only
// ever talks to the trait, never to a concrete backing.

pub mod file;
pub mod memory;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AuthError;

/// The access/refresh token pair a store persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry of the access token, as issued by the backend.
    pub expires_at: DateTime<Utc>,
}

/// Which persistence class backs a credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Credentials never leave process memory.
    Secure,
    /// Credentials are written to host-readable storage.
    Plain,
}

/// Trait for credential persistence backends.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Expiry of the currently stored access token, if any.
    async fn get_expiry(&self) -> Option<DateTime<Utc>>;

    /// Whether a token pair is currently stored.
    async fn is_authenticated(&self) -> bool;

    /// Replace the stored token pair.
    async fn put(&self, tokens: TokenPair) -> Result<(), AuthError>;

    /// Remove any stored token pair.
    async fn clear(&self);

    /// Which persistence class backs this store.
    fn mode(&self) -> StoreMode;
}

/// Probe the environment and select a credential store.
///
/// Prefers the persistent file store when the target path is usable and
/// falls back to the volatile in-memory store. Selection happens once, at
/// startup; callers hold the trait object and never re-probe.
pub fn select_store<P: AsRef<Path>>(path: P) -> Arc<dyn CredentialStore> {
    match FileCredentialStore::open(path.as_ref()) {
        Ok(store) => {
            info!(
                "Using file credential store at {}",
                path.as_ref().display()
            );
            Arc::new(store)
        }
        Err(e) => {
            warn!(
                "File credential store unavailable ({}), falling back to in-memory store",
                e
            );
            Arc::new(MemoryCredentialStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_store_prefers_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = select_store(dir.path().join("tokens.json"));
        assert_eq!(store.mode(), StoreMode::Plain);
    }

    #[test]
    fn test_select_store_falls_back_to_memory() {
        let store = select_store("/proc/no-such-dir/tokens.json");
        assert_eq!(store.mode(), StoreMode::Secure);
    }
}
