// Activity tracking
// Collapses the host's high-frequency interaction signals into a throttled
// activity event so the lifecycle clock is not flooded.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Minimum spacing between emitted activity events.
const THROTTLE_WINDOW: Duration = Duration::from_secs(1);

/// A raw user interaction signal reported by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    PointerMove,
    KeyPress,
    Scroll,
    Touch,
    Click,
}

/// Cloneable handle the host uses to push raw signals into the tracker.
/// Sending never blocks and never fails visibly; signals reported while the
/// tracker is stopped are dropped.
#[derive(Clone)]
pub struct ActivitySignalSender {
    tx: mpsc::UnboundedSender<ActivitySignal>,
}

impl ActivitySignalSender {
    pub fn report(&self, signal: ActivitySignal) {
        let _ = self.tx.send(signal);
    }
}

struct Running {
    tx: mpsc::UnboundedSender<ActivitySignal>,
    task: JoinHandle<()>,
}

/// Throttles raw interaction signals to at most one activity callback per
/// second. Cannot fail, only be inert: `start` while running is a no-op and
/// signals sent while stopped go nowhere.
pub struct ActivityTracker {
    running: Mutex<Option<Running>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Begin consuming signals, invoking `on_activity` for at most one
    /// signal per throttle window. No-op when already started.
    pub fn start(&self, on_activity: Arc<dyn Fn() + Send + Sync>) {
        let mut guard = self.lock();
        if guard.is_some() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ActivitySignal>();
        let task = tokio::spawn(async move {
            let mut last_emit: Option<Instant> = None;
            while let Some(signal) = rx.recv().await {
                let now = Instant::now();
                let due = last_emit
                    .map(|t| now.duration_since(t) >= THROTTLE_WINDOW)
                    .unwrap_or(true);
                if due {
                    last_emit = Some(now);
                    debug!("Activity detected: {:?}", signal);
                    on_activity();
                }
            }
        });

        *guard = Some(Running { tx, task });
    }

    /// Detach the consumer and drop any signals still in flight. No-op when
    /// already stopped.
    pub fn stop(&self) {
        if let Some(running) = self.lock().take() {
            running.task.abort();
        }
    }

    /// Handle for pushing signals. `None` until `start` has been called.
    pub fn handle(&self) -> Option<ActivitySignalSender> {
        self.lock()
            .as_ref()
            .map(|running| ActivitySignalSender {
                tx: running.tx.clone(),
            })
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActivityTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_burst_is_throttled_to_one_event() {
        let tracker = ActivityTracker::new();
        let events = Arc::new(AtomicU32::new(0));

        let counter = events.clone();
        tracker.start(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let handle = tracker.handle().unwrap();
        for _ in 0..20 {
            handle.report(ActivitySignal::PointerMove);
        }
        settle().await;

        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let tracker = ActivityTracker::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let counter = first.clone();
        tracker.start(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = second.clone();
        tracker.start(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tracker.handle().unwrap().report(ActivitySignal::Click);
        settle().await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stopped_tracker_drops_signals() {
        let tracker = ActivityTracker::new();
        let events = Arc::new(AtomicU32::new(0));

        let counter = events.clone();
        tracker.start(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let handle = tracker.handle().unwrap();

        tracker.stop();
        assert!(!tracker.is_running());

        handle.report(ActivitySignal::KeyPress);
        settle().await;

        assert_eq!(events.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let tracker = ActivityTracker::new();
        tracker.start(Arc::new(|| {}));
        tracker.stop();
        tracker.stop();
        assert!(!tracker.is_running());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let tracker = ActivityTracker::new();
        let events = Arc::new(AtomicU32::new(0));

        tracker.start(Arc::new(|| {}));
        tracker.stop();

        let counter = events.clone();
        tracker.start(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        tracker.handle().unwrap().report(ActivitySignal::Scroll);
        settle().await;

        assert_eq!(events.load(Ordering::SeqCst), 1);
    }
}
