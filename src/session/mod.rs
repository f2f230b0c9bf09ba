// Session lifecycle module
// Expiry tracking, pre-expiry warnings, concurrent-session detection and
// activity-driven auto-extension for one client-held session.

pub mod activity;
pub mod manager;
pub mod types;

pub use activity::{ActivitySignal, ActivitySignalSender, ActivityTracker};
pub use manager::SessionLifecycleManager;
pub use types::{
    SessionConfig, SessionConfigUpdate, SessionEventHandlers, SessionEventHandlersBuilder,
    SessionInfo,
};
