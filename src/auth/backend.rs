// Identity backend capability
// Network calls to the identity provider live behind this trait; the
// lifecycle logic consumes it and never sees a transport.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::AuthError;
use crate::store::TokenPair;

/// A freshly issued credential from a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub tokens: TokenPair,
    /// Expiry of the new access token, as issued by the backend.
    pub expires_at: DateTime<Utc>,
}

/// Trait for identity backend implementations.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange the current refresh credential for a new access credential.
    async fn refresh(&self) -> Result<RefreshGrant, AuthError>;

    /// Number of active sessions for the current principal.
    async fn concurrent_session_count(&self) -> Result<usize, AuthError>;

    /// Invalidate every session for the principal except this one.
    async fn invalidate_other_sessions(&self) -> Result<(), AuthError>;

    /// Invalidate every session for the principal, including this one.
    async fn invalidate_all_sessions(&self) -> Result<(), AuthError>;
}

/// Scriptable backend for tests.
///
/// Grants a fixed-horizon expiry on refresh, reports a settable concurrent
/// session count, and can be told to fail upcoming calls. Call counters let
/// tests assert how often the lifecycle logic actually hit the backend.
pub struct MockAuthBackend {
    session_ttl: Mutex<Duration>,
    concurrent: AtomicUsize,
    refresh_failures: Mutex<VecDeque<AuthError>>,
    concurrent_failures: Mutex<VecDeque<AuthError>>,
    pub refresh_calls: AtomicUsize,
    pub invalidate_other_calls: AtomicUsize,
    pub invalidate_all_calls: AtomicUsize,
}

impl MockAuthBackend {
    pub fn new() -> Self {
        Self {
            session_ttl: Mutex::new(Duration::minutes(30)),
            concurrent: AtomicUsize::new(1),
            refresh_failures: Mutex::new(VecDeque::new()),
            concurrent_failures: Mutex::new(VecDeque::new()),
            refresh_calls: AtomicUsize::new(0),
            invalidate_other_calls: AtomicUsize::new(0),
            invalidate_all_calls: AtomicUsize::new(0),
        }
    }

    /// Expiry horizon granted by subsequent refreshes.
    pub fn set_session_ttl(&self, ttl: Duration) {
        *lock(&self.session_ttl) = ttl;
    }

    pub fn set_concurrent_sessions(&self, count: usize) {
        self.concurrent.store(count, Ordering::SeqCst);
    }

    /// Queue an error for the next `refresh` call. Queued errors are
    /// consumed in order before refreshes succeed again.
    pub fn fail_next_refresh(&self, err: AuthError) {
        lock(&self.refresh_failures).push_back(err);
    }

    /// Queue an error for the next `concurrent_session_count` call.
    pub fn fail_next_concurrent_poll(&self, err: AuthError) {
        lock(&self.concurrent_failures).push_back(err);
    }
}

impl Default for MockAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl AuthBackend for MockAuthBackend {
    async fn refresh(&self) -> Result<RefreshGrant, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = lock(&self.refresh_failures).pop_front() {
            return Err(err);
        }

        let expires_at = Utc::now() + *lock(&self.session_ttl);
        Ok(RefreshGrant {
            tokens: TokenPair {
                access_token: format!("access-{}", uuid::Uuid::new_v4()),
                refresh_token: format!("refresh-{}", uuid::Uuid::new_v4()),
                expires_at,
            },
            expires_at,
        })
    }

    async fn concurrent_session_count(&self) -> Result<usize, AuthError> {
        if let Some(err) = lock(&self.concurrent_failures).pop_front() {
            return Err(err);
        }
        Ok(self.concurrent.load(Ordering::SeqCst))
    }

    async fn invalidate_other_sessions(&self) -> Result<(), AuthError> {
        self.invalidate_other_calls.fetch_add(1, Ordering::SeqCst);
        self.concurrent.store(1, Ordering::SeqCst);
        Ok(())
    }

    async fn invalidate_all_sessions(&self) -> Result<(), AuthError> {
        self.invalidate_all_calls.fetch_add(1, Ordering::SeqCst);
        self.concurrent.store(0, Ordering::SeqCst);
        Ok(())
    }
}
