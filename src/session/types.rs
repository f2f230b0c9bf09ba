// Session types and data structures

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Session lifecycle configuration.
///
/// Immutable per update; `SessionLifecycleManager::update_config` replaces
/// it wholesale and restarts the lifecycle clock.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Total session lifetime budget. Informational; the actual expiry
    /// always comes from the backend's issued timestamp.
    pub timeout_minutes: u64,
    /// How long before expiry the warning fires.
    pub warning_minutes: u64,
    /// Polling cadence of the lifecycle clock.
    pub check_interval_secs: u64,
    /// Threshold above which the concurrent-session event fires.
    pub max_concurrent_sessions: usize,
    /// Whether the activity tracker runs at all.
    pub track_activity: bool,
    /// Whether recent activity silently triggers an extend instead of a
    /// warning.
    pub auto_extend_on_activity: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            warning_minutes: 5,
            check_interval_secs: 60,
            max_concurrent_sessions: 3,
            track_activity: true,
            auto_extend_on_activity: false,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_minutes == 0 {
            return Err("timeout_minutes must be at least 1".to_string());
        }
        if self.warning_minutes >= self.timeout_minutes {
            return Err(format!(
                "warning_minutes ({}) must be less than timeout_minutes ({})",
                self.warning_minutes, self.timeout_minutes
            ));
        }
        if self.check_interval_secs == 0 {
            return Err("check_interval_secs must be at least 1".to_string());
        }
        Ok(())
    }

    /// Warning window, in seconds before expiry.
    pub fn warning_window_secs(&self) -> i64 {
        self.warning_minutes as i64 * 60
    }
}

/// Partial configuration overlay for hot-reconfiguration. Present fields
/// replace the current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfigUpdate {
    pub timeout_minutes: Option<u64>,
    pub warning_minutes: Option<u64>,
    pub check_interval_secs: Option<u64>,
    pub max_concurrent_sessions: Option<usize>,
    pub track_activity: Option<bool>,
    pub auto_extend_on_activity: Option<bool>,
}

impl SessionConfigUpdate {
    /// Apply this overlay on top of `base`.
    pub fn apply(&self, base: &SessionConfig) -> SessionConfig {
        SessionConfig {
            timeout_minutes: self.timeout_minutes.unwrap_or(base.timeout_minutes),
            warning_minutes: self.warning_minutes.unwrap_or(base.warning_minutes),
            check_interval_secs: self.check_interval_secs.unwrap_or(base.check_interval_secs),
            max_concurrent_sessions: self
                .max_concurrent_sessions
                .unwrap_or(base.max_concurrent_sessions),
            track_activity: self.track_activity.unwrap_or(base.track_activity),
            auto_extend_on_activity: self
                .auto_extend_on_activity
                .unwrap_or(base.auto_extend_on_activity),
        }
    }
}

/// Live session state. Owned by exactly one `SessionLifecycleManager`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Locally generated identifier for diagnostic correlation only.
    pub session_id: String,
    pub is_active: bool,
    /// Absolute expiry of the current access credential. `None` means
    /// unauthenticated, and `is_active` is false whenever this is `None`.
    pub expires_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    /// Set exactly once per expiry cycle, reset on extension.
    pub warning_shown: bool,
    /// Last count reported by the backend.
    pub concurrent_sessions: usize,
}

impl SessionInfo {
    pub fn new(expires_at: DateTime<Utc>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            is_active: true,
            expires_at: Some(expires_at),
            last_activity: Utc::now(),
            warning_shown: false,
            concurrent_sessions: 1,
        }
    }

    /// Whole seconds until expiry at `now`, clamped to zero.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> u64 {
        match self.expires_at {
            Some(expires_at) if expires_at > now => (expires_at - now).num_seconds().max(0) as u64,
            _ => 0,
        }
    }
}

type UnitHandler = Arc<dyn Fn() + Send + Sync>;
type SecondsHandler = Arc<dyn Fn(u64) + Send + Sync>;
type CountHandler = Arc<dyn Fn(usize) + Send + Sync>;

/// Fixed set of typed callback slots, established at construction and only
/// ever replaced as a whole via `update_handlers`.
#[derive(Clone, Default)]
pub struct SessionEventHandlers {
    on_warning: Option<SecondsHandler>,
    on_timeout: Option<UnitHandler>,
    on_concurrent_session: Option<CountHandler>,
    on_session_extended: Option<UnitHandler>,
    on_activity_detected: Option<UnitHandler>,
}

impl SessionEventHandlers {
    pub fn builder() -> SessionEventHandlersBuilder {
        SessionEventHandlersBuilder {
            handlers: SessionEventHandlers::default(),
        }
    }

    pub(crate) fn warning(&self, seconds_remaining: u64) {
        if let Some(handler) = &self.on_warning {
            handler(seconds_remaining);
        }
    }

    pub(crate) fn timeout(&self) {
        if let Some(handler) = &self.on_timeout {
            handler();
        }
    }

    pub(crate) fn concurrent_session(&self, count: usize) {
        if let Some(handler) = &self.on_concurrent_session {
            handler(count);
        }
    }

    pub(crate) fn session_extended(&self) {
        if let Some(handler) = &self.on_session_extended {
            handler();
        }
    }

    pub(crate) fn activity_detected(&self) {
        if let Some(handler) = &self.on_activity_detected {
            handler();
        }
    }
}

/// Builder for `SessionEventHandlers`.
pub struct SessionEventHandlersBuilder {
    handlers: SessionEventHandlers,
}

impl SessionEventHandlersBuilder {
    /// Called when the warning window is entered, with seconds remaining.
    pub fn on_warning(mut self, handler: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.handlers.on_warning = Some(Arc::new(handler));
        self
    }

    /// Called when the session times out. Terminal until re-initialized.
    pub fn on_timeout(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.handlers.on_timeout = Some(Arc::new(handler));
        self
    }

    /// Called when the backend reports more sessions than allowed.
    pub fn on_concurrent_session(mut self, handler: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.handlers.on_concurrent_session = Some(Arc::new(handler));
        self
    }

    /// Called after a successful extension.
    pub fn on_session_extended(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.handlers.on_session_extended = Some(Arc::new(handler));
        self
    }

    /// Called on each throttled activity event.
    pub fn on_activity_detected(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.handlers.on_activity_detected = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> SessionEventHandlers {
        self.handlers
    }
}
