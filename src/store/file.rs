// JSON-file-backed credential store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{CredentialStore, StoreMode, TokenPair};
use crate::error::AuthError;

/// Credential store persisted to a JSON file on the host filesystem.
///
/// The token pair is host-readable, so this backing reports
/// `StoreMode::Plain`. The in-memory copy is authoritative; the file is
/// rewritten on every `put`/`clear` so a restart picks up where the last
/// session left off.
pub struct FileCredentialStore {
    path: PathBuf,
    tokens: RwLock<Option<TokenPair>>,
}

impl FileCredentialStore {
    /// Open the store at `path`, loading any previously persisted pair.
    ///
    /// Fails if the location is not usable for writing, which the startup
    /// probe treats as "pick another backing".
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
            }
        }

        let tokens = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<TokenPair>(&contents) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!(
                        "Ignoring unreadable credential file {}: {}",
                        path.display(),
                        e
                    );
                    None
                }
            },
            Err(_) => None,
        };

        // Verify the location is writable before committing to it.
        let probe = path.with_extension("probe");
        fs::File::create(&probe)
            .and_then(|mut f| f.write_all(b"probe"))
            .map_err(|e| format!("cannot write to {}: {}", path.display(), e))?;
        let _ = fs::remove_file(&probe);

        Ok(Self {
            path,
            tokens: RwLock::new(tokens),
        })
    }

    fn persist(&self, tokens: &Option<TokenPair>) -> Result<(), AuthError> {
        match tokens {
            Some(pair) => {
                let contents = serde_json::to_string_pretty(pair)
                    .map_err(|e| AuthError::Unknown(format!("serialize tokens: {}", e)))?;
                fs::write(&self.path, contents)
                    .map_err(|e| AuthError::Unknown(format!("write tokens: {}", e)))?;
            }
            None => {
                if self.path.exists() {
                    fs::remove_file(&self.path)
                        .map_err(|e| AuthError::Unknown(format!("remove tokens: {}", e)))?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_expiry(&self) -> Option<DateTime<Utc>> {
        self.tokens.read().await.as_ref().map(|t| t.expires_at)
    }

    async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    async fn put(&self, tokens: TokenPair) -> Result<(), AuthError> {
        debug!(
            "Persisting token pair expiring at {} to {}",
            tokens.expires_at,
            self.path.display()
        );
        let mut guard = self.tokens.write().await;
        *guard = Some(tokens);
        self.persist(&guard)
    }

    async fn clear(&self) {
        let mut guard = self.tokens.write().await;
        *guard = None;
        if let Err(e) = self.persist(&guard) {
            warn!("Failed to remove persisted credentials: {}", e);
        }
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_roundtrip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileCredentialStore::open(&path).unwrap();
        store.put(pair()).await.unwrap();

        let reopened = FileCredentialStore::open(&path).unwrap();
        assert!(reopened.is_authenticated().await);
        assert!(reopened.get_expiry().await.is_some());
    }

    #[tokio::test]
    async fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileCredentialStore::open(&path).unwrap();
        store.put(pair()).await.unwrap();
        assert!(path.exists());

        store.clear().await;
        assert!(!path.exists());
        assert!(!store.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, "not json").unwrap();

        let store = FileCredentialStore::open(&path).unwrap();
        assert!(!store.is_authenticated().await);
    }

    #[test]
    fn test_open_rejects_unwritable_location() {
        assert!(FileCredentialStore::open("/proc/definitely/not/writable.json").is_err());
    }
}
