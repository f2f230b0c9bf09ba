// Session lifecycle manager
// Owns the expiry clock, the warning countdown, the concurrent-session poll
// and the auto-extension policy for exactly one session.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::activity::{ActivitySignalSender, ActivityTracker};
use super::types::{SessionConfig, SessionConfigUpdate, SessionEventHandlers, SessionInfo};
use crate::auth::{AuthBackend, AuthenticationState, OperationClass, OperationExecutor, RefreshGrant};
use crate::store::CredentialStore;

/// How recent the last activity must be for silent auto-extension.
const AUTO_EXTEND_ACTIVITY_WINDOW_SECS: i64 = 300;

/// What a lifecycle clock tick decided to do. Pure function of
/// `(now, config, info)` so the timing rules are testable without timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckDecision {
    Idle,
    Warn { seconds_remaining: u64 },
    AutoExtend,
    Timeout,
}

pub(crate) fn evaluate(
    now: DateTime<Utc>,
    config: &SessionConfig,
    info: &SessionInfo,
) -> CheckDecision {
    let Some(expires_at) = info.expires_at else {
        return CheckDecision::Timeout;
    };
    if expires_at <= now {
        return CheckDecision::Timeout;
    }

    // Recent activity pre-empts the warning entirely.
    if config.auto_extend_on_activity
        && now - info.last_activity <= Duration::seconds(AUTO_EXTEND_ACTIVITY_WINDOW_SECS)
    {
        return CheckDecision::AutoExtend;
    }

    let remaining = (expires_at - now).num_seconds();
    if !info.warning_shown && remaining <= config.warning_window_secs() {
        return CheckDecision::Warn {
            seconds_remaining: remaining.max(0) as u64,
        };
    }

    CheckDecision::Idle
}

#[derive(Default)]
struct Timers {
    check: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
}

struct Inner {
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn CredentialStore>,
    executor: OperationExecutor<RefreshGrant>,
    tracker: ActivityTracker,
    config: RwLock<SessionConfig>,
    info: RwLock<Option<SessionInfo>>,
    handlers: RwLock<Arc<SessionEventHandlers>>,
    timers: Mutex<Timers>,
    destroyed: AtomicBool,
    concurrent_flagged: AtomicBool,
}

impl Inner {
    fn config_snapshot(&self) -> SessionConfig {
        read(&self.config).clone()
    }

    fn info_snapshot(&self) -> Option<SessionInfo> {
        read(&self.info).clone()
    }

    fn handlers_snapshot(&self) -> Arc<SessionEventHandlers> {
        read(&self.handlers).clone()
    }
}

/// Drives one session through `Active -> Warning -> Extended/TimedOut`,
/// with concurrent-session detection as an orthogonal dimension.
///
/// Explicitly constructed and explicitly owned; lifecycle is `initialize`
/// and `destroy`, never implied. All methods must be called from within a
/// tokio runtime.
pub struct SessionLifecycleManager {
    inner: Arc<Inner>,
}

impl SessionLifecycleManager {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
        handlers: SessionEventHandlers,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                executor: OperationExecutor::new(),
                tracker: ActivityTracker::new(),
                config: RwLock::new(config),
                info: RwLock::new(None),
                handlers: RwLock::new(Arc::new(handlers)),
                timers: Mutex::new(Timers::default()),
                destroyed: AtomicBool::new(false),
                concurrent_flagged: AtomicBool::new(false),
            }),
        }
    }

    /// Move from `Unauthenticated` to `Active` if the credential store
    /// holds a session with a future expiry. Starts the lifecycle clock
    /// and, when configured, the activity tracker.
    ///
    /// Returns whether a session became active.
    pub async fn initialize(&self) -> bool {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            return false;
        }

        if !inner.store.is_authenticated().await {
            info!("No stored credentials, staying unauthenticated");
            return false;
        }

        let now = Utc::now();
        let expires_at = match inner.store.get_expiry().await {
            Some(e) if e > now => e,
            Some(e) => {
                info!("Stored credentials expired at {}, staying unauthenticated", e);
                return false;
            }
            None => {
                info!("Stored credentials carry no expiry, staying unauthenticated");
                return false;
            }
        };

        {
            let session = SessionInfo::new(expires_at);
            info!("Session {} active until {}", session.session_id, expires_at);
            *write(&inner.info) = Some(session);
        }
        inner.concurrent_flagged.store(false, Ordering::SeqCst);

        // A countdown from a previous cycle has no business in this one.
        if let Some(countdown) = lock(&inner.timers).countdown.take() {
            countdown.abort();
        }

        if inner.config_snapshot().track_activity {
            Self::start_tracker(inner);
        }
        Self::start_clock(inner);
        true
    }

    /// Tear down all timers and listeners. Idempotent and callable from any
    /// state; every public method afterwards is a safe no-op.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Destroying session lifecycle manager");
        let mut timers = lock(&self.inner.timers);
        if let Some(task) = timers.check.take() {
            task.abort();
        }
        if let Some(task) = timers.countdown.take() {
            task.abort();
        }
        drop(timers);
        self.inner.tracker.stop();
    }

    /// Explicitly extend the session via a refresh. On success the expiry
    /// is replaced, the warning cycle resets and the countdown is
    /// cancelled. On failure nothing changes; the caller decides what to do
    /// and the countdown keeps running.
    pub async fn extend_session(&self) -> bool {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return false;
        }
        do_extend(&self.inner).await
    }

    pub fn get_session_info(&self) -> Option<SessionInfo> {
        self.inner.info_snapshot()
    }

    /// Execution state of the refresh envelope, including `can_retry`.
    pub fn authentication_state(&self) -> AuthenticationState {
        self.inner.executor.state()
    }

    /// Overlay configuration and restart the lifecycle clock at the new
    /// cadence. `SessionInfo` is preserved.
    pub fn update_config(&self, update: SessionConfigUpdate) -> Result<(), String> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let merged = update.apply(&inner.config_snapshot());
        merged.validate()?;
        info!(
            "Session configuration updated: check every {}s, warn {}m before expiry",
            merged.check_interval_secs, merged.warning_minutes
        );
        let track_activity = merged.track_activity;
        *write(&inner.config) = merged;

        if inner.info_snapshot().is_some() {
            Self::start_clock(inner);
            if track_activity {
                Self::start_tracker(inner);
            } else {
                inner.tracker.stop();
            }
        }
        Ok(())
    }

    /// Atomically replace the whole callback set.
    pub fn update_handlers(&self, handlers: SessionEventHandlers) {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return;
        }
        *write(&self.inner.handlers) = Arc::new(handlers);
    }

    /// Acknowledge the concurrent-session flag without touching the
    /// backend.
    pub fn continue_session(&self) {
        self.inner.concurrent_flagged.store(false, Ordering::SeqCst);
    }

    /// Whether the concurrent-session threshold was exceeded and not yet
    /// acknowledged or resolved.
    pub fn is_concurrent_flagged(&self) -> bool {
        self.inner.concurrent_flagged.load(Ordering::SeqCst)
    }

    /// Invalidate every other session for the principal. The expiry
    /// sub-state is untouched.
    pub async fn logout_other_sessions(&self) -> bool {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) || inner.info_snapshot().is_none() {
            return false;
        }
        match inner.backend.invalidate_other_sessions().await {
            Ok(()) => {
                if let Some(session) = write(&inner.info).as_mut() {
                    session.concurrent_sessions = 1;
                }
                inner.concurrent_flagged.store(false, Ordering::SeqCst);
                info!("Invalidated other sessions for the current principal");
                true
            }
            Err(e) => {
                warn!("Failed to invalidate other sessions: {}", e);
                false
            }
        }
    }

    /// Invalidate every session including this one and transition straight
    /// to `Unauthenticated`.
    pub async fn logout_all_sessions(&self) -> bool {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) || inner.info_snapshot().is_none() {
            return false;
        }
        match inner.backend.invalidate_all_sessions().await {
            Ok(()) => {
                expire_session(inner, "all sessions invalidated").await;
                true
            }
            Err(e) => {
                warn!("Failed to invalidate all sessions: {}", e);
                false
            }
        }
    }

    /// Handle for pushing raw interaction signals. `None` until the
    /// tracker has been started by `initialize`.
    pub fn activity_handle(&self) -> Option<ActivitySignalSender> {
        self.inner.tracker.handle()
    }

    fn start_tracker(inner: &Arc<Inner>) {
        let weak = Arc::downgrade(inner);
        inner.tracker.start(Arc::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            if let Some(session) = write(&inner.info).as_mut() {
                session.last_activity = Utc::now();
            }
            inner.handlers_snapshot().activity_detected();
        }));
    }

    /// (Re)start the recurring lifecycle check. The previous clock is
    /// always cancelled first; exactly one exists per active session.
    fn start_clock(inner: &Arc<Inner>) {
        let interval_secs = inner.config_snapshot().check_interval_secs.max(1);
        let weak = Arc::downgrade(inner);

        let mut timers = lock(&inner.timers);
        if let Some(old) = timers.check.take() {
            old.abort();
        }
        timers.check = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; checks start one full
            // interval from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.destroyed.load(Ordering::SeqCst) {
                    break;
                }
                if !run_check(&inner).await {
                    break;
                }
            }
        }));
    }
}

impl Drop for SessionLifecycleManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// One lifecycle clock tick. Returns false once the session has ended and
/// the clock should stop.
async fn run_check(inner: &Arc<Inner>) -> bool {
    let config = inner.config_snapshot();
    let now = Utc::now();
    let Some(snapshot) = inner.info_snapshot() else {
        return false;
    };

    match evaluate(now, &config, &snapshot) {
        CheckDecision::Timeout => {
            expire_session(inner, "session expired").await;
            return false;
        }
        CheckDecision::AutoExtend => {
            if do_extend(inner).await {
                debug!("Session auto-extended on recent activity");
            } else {
                debug!("Auto-extension failed, leaving session state unchanged");
            }
        }
        CheckDecision::Warn { seconds_remaining } => {
            // Claim the warning under the lock; a concurrent extension may
            // have reset the cycle since the snapshot was taken.
            let armed = {
                let mut guard = write(&inner.info);
                match guard.as_mut() {
                    Some(session) if !session.warning_shown => {
                        session.warning_shown = true;
                        session.expires_at
                    }
                    _ => None,
                }
            };
            if let Some(expires_at) = armed {
                info!("Session expires in {}s, surfacing warning", seconds_remaining);
                inner.handlers_snapshot().warning(seconds_remaining);
                arm_countdown(inner, expires_at);
            }
        }
        CheckDecision::Idle => {}
    }

    poll_concurrent_sessions(inner, &config).await;
    true
}

/// Best-effort concurrent-session poll; failures are logged and ignored.
async fn poll_concurrent_sessions(inner: &Arc<Inner>, config: &SessionConfig) {
    match inner.backend.concurrent_session_count().await {
        Ok(count) => {
            let recorded = {
                let mut guard = write(&inner.info);
                match guard.as_mut() {
                    Some(session) => {
                        session.concurrent_sessions = count;
                        true
                    }
                    None => false,
                }
            };
            if recorded && count > config.max_concurrent_sessions {
                inner.concurrent_flagged.store(true, Ordering::SeqCst);
                warn!(
                    "{} concurrent sessions exceed the limit of {}",
                    count, config.max_concurrent_sessions
                );
                inner.handlers_snapshot().concurrent_session(count);
            }
        }
        Err(e) => debug!("Concurrent-session poll failed: {}", e),
    }
}

/// Arm the one-shot warning countdown for exactly the remaining duration.
/// When it fires it re-validates `expires_at` against the wall clock, so a
/// racing extension that already replaced the expiry wins.
fn arm_countdown(inner: &Arc<Inner>, expires_at: DateTime<Utc>) {
    let weak = Arc::downgrade(inner);
    let mut timers = lock(&inner.timers);
    if let Some(old) = timers.countdown.take() {
        old.abort();
    }
    timers.countdown = Some(tokio::spawn(async move {
        let wait = (expires_at - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let Some(inner) = weak.upgrade() else { return };
        if inner.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let now = Utc::now();
        let still_expired = matches!(
            inner.info_snapshot(),
            Some(session) if matches!(session.expires_at, Some(e) if e <= now)
        );
        if still_expired {
            expire_session(&inner, "warning countdown elapsed").await;
        } else {
            debug!("Countdown fired after extension, ignoring");
        }
    }));
}

/// Shared extend path for `extend_session` and auto-extension.
async fn do_extend(inner: &Arc<Inner>) -> bool {
    if inner.info_snapshot().is_none() {
        return false;
    }

    let backend = inner.backend.clone();
    let result = inner
        .executor
        .execute(
            move || {
                let backend = backend.clone();
                async move { backend.refresh().await }
            },
            OperationClass::Refreshing,
            true,
        )
        .await;

    let Some(grant) = result.data else {
        warn!(
            "Session extension failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        return false;
    };

    if let Err(e) = inner.store.put(grant.tokens.clone()).await {
        // The in-memory expiry stays authoritative for this process.
        warn!("Failed to persist refreshed credentials: {}", e);
    }

    {
        let mut guard = write(&inner.info);
        match guard.as_mut() {
            Some(session) => {
                session.expires_at = Some(grant.expires_at);
                session.warning_shown = false;
                session.is_active = true;
            }
            None => {
                debug!("Extension completed after session end, discarding grant");
                return false;
            }
        }
    }

    if let Some(countdown) = lock(&inner.timers).countdown.take() {
        countdown.abort();
    }

    info!("Session extended until {}", grant.expires_at);
    inner.handlers_snapshot().session_extended();
    true
}

/// Terminal timeout path: clear state, stop everything, notify.
async fn expire_session(inner: &Arc<Inner>, reason: &str) {
    let Some(session) = write(&inner.info).take() else {
        return;
    };
    info!("Session {} ended: {}", session.session_id, reason);

    inner.concurrent_flagged.store(false, Ordering::SeqCst);
    inner.store.clear().await;
    inner.tracker.stop();
    inner.handlers_snapshot().timeout();

    // Timers last: one of them may be running this function, and abort only
    // lands at the next await point.
    let mut timers = lock(&inner.timers);
    if let Some(task) = timers.check.take() {
        task.abort();
    }
    if let Some(task) = timers.countdown.take() {
        task.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(rwlock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(rwlock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(|e| e.into_inner())
}
