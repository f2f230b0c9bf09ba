// Authentication operation executor
// Wraps every auth call in one envelope: loading-state bookkeeping, error
// classification, and a bounded retry handle. Operation errors never escape
// as panics or raw results; callers always get an OperationResult.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{AuthError, MAX_RETRY_ATTEMPTS};

/// Which in-flight flag an operation holds for its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Authenticating,
    Refreshing,
    Loading,
}

/// Caller-visible execution state. Owned by one executor, reset between
/// operations, never destroyed.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationState {
    pub is_loading: bool,
    pub is_authenticating: bool,
    pub is_refreshing: bool,
    /// User-facing message for the last failure.
    pub error: Option<String>,
    /// Classified cause of the last failure. Cleared together with `error`.
    pub last_error: Option<AuthError>,
    pub retry_count: u32,
    pub can_retry: bool,
}

impl AuthenticationState {
    fn set_in_flight(&mut self, class: OperationClass, value: bool) {
        match class {
            OperationClass::Authenticating => self.is_authenticating = value,
            OperationClass::Refreshing => self.is_refreshing = value,
            OperationClass::Loading => self.is_loading = value,
        }
    }
}

/// Outcome of an executed operation. Failures carry the classified kind and
/// the derived caller hints instead of an exception.
#[derive(Debug, Clone)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<AuthError>,
    pub requires_verification: bool,
    pub requires_captcha: bool,
    pub retry_after: Option<u64>,
}

impl<T> OperationResult<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            requires_verification: false,
            requires_captcha: false,
            retry_after: None,
        }
    }

    fn failed(err: &AuthError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_kind: Some(err.clone()),
            requires_verification: err.requires_verification(),
            requires_captcha: err.requires_captcha(),
            retry_after: err.retry_after(),
        }
    }

    fn unavailable(message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
            error_kind: None,
            requires_verification: false,
            requires_captcha: false,
            retry_after: None,
        }
    }
}

type BoxedOperation<T> =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<T, AuthError>> + Send>> + Send + Sync>;

struct StoredOperation<T> {
    op: BoxedOperation<T>,
    class: OperationClass,
    retryable: bool,
}

impl<T> Clone for StoredOperation<T> {
    fn clone(&self) -> Self {
        Self {
            op: Arc::clone(&self.op),
            class: self.class,
            retryable: self.retryable,
        }
    }
}

struct ExecutorState<T> {
    auth: AuthenticationState,
    last_operation: Option<StoredOperation<T>>,
}

/// Executes authentication operations with uniform retry/error semantics.
///
/// At most one "last operation" is retained for `retry`, overwritten by the
/// most recent retryable failure and cleared by any success. Executor
/// instances never share retry state.
pub struct OperationExecutor<T> {
    state: Mutex<ExecutorState<T>>,
}

impl<T: Send + 'static> OperationExecutor<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExecutorState {
                auth: AuthenticationState::default(),
                last_operation: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecutorState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the current execution state.
    pub fn state(&self) -> AuthenticationState {
        self.lock().auth.clone()
    }

    /// Clear the recorded error without touching retry bookkeeping.
    pub fn clear_error(&self) {
        let mut state = self.lock();
        state.auth.error = None;
        state.auth.last_error = None;
    }

    /// Run one operation under the given class flag.
    ///
    /// `retryable` marks whether the closure may be re-invoked unchanged via
    /// `retry` after a failure.
    pub async fn execute<F, Fut>(
        &self,
        operation: F,
        class: OperationClass,
        retryable: bool,
    ) -> OperationResult<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AuthError>> + Send + 'static,
    {
        let op: BoxedOperation<T> = Arc::new(move || Box::pin(operation()));
        self.run(op, class, retryable).await
    }

    /// Re-invoke the stored operation unchanged.
    ///
    /// Fails fast with a non-throwing result when nothing retryable is
    /// stored or the retry ceiling has been reached; the underlying
    /// operation is not invoked in either case.
    pub async fn retry(&self) -> OperationResult<T> {
        let stored = {
            let state = self.lock();
            if state.auth.can_retry {
                state.last_operation.clone()
            } else {
                None
            }
        };

        match stored {
            Some(stored) => self.run(stored.op, stored.class, stored.retryable).await,
            None => {
                debug!("Retry requested but no retryable operation is available");
                OperationResult::unavailable("no retryable operation available")
            }
        }
    }

    async fn run(
        &self,
        op: BoxedOperation<T>,
        class: OperationClass,
        retryable: bool,
    ) -> OperationResult<T> {
        {
            let mut state = self.lock();
            state.auth.set_in_flight(class, true);
            state.auth.error = None;
            state.auth.last_error = None;
        }

        let outcome = (op)().await;

        let mut state = self.lock();
        state.auth.set_in_flight(class, false);

        match outcome {
            Ok(data) => {
                state.auth.retry_count = 0;
                state.auth.can_retry = false;
                state.last_operation = None;
                OperationResult::ok(data)
            }
            Err(err) => {
                state.auth.retry_count += 1;
                state.auth.can_retry =
                    retryable && err.retryable() && state.auth.retry_count < MAX_RETRY_ATTEMPTS;
                state.auth.error = Some(err.to_string());
                state.auth.last_error = Some(err.clone());
                if retryable {
                    state.last_operation = Some(StoredOperation {
                        op,
                        class,
                        retryable,
                    });
                }
                warn!(
                    "Authentication operation failed (attempt {}): {}",
                    state.auth.retry_count, err
                );
                OperationResult::failed(&err)
            }
        }
    }
}

impl<T: Send + 'static> Default for OperationExecutor<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_success_returns_data_and_resets_state() {
        let executor = OperationExecutor::<u32>::new();

        let result = executor
            .execute(|| async { Ok(42) }, OperationClass::Loading, true)
            .await;

        assert!(result.success);
        assert_eq!(result.data, Some(42));

        let state = executor.state();
        assert_eq!(state.retry_count, 0);
        assert!(!state.is_loading);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_is_converted_not_propagated() {
        let executor = OperationExecutor::<u32>::new();

        let result = executor
            .execute(
                || async { Err(AuthError::Authentication("bad password".into())) },
                OperationClass::Authenticating,
                true,
            )
            .await;

        assert!(!result.success);
        assert!(result.data.is_none());
        assert!(result.error.unwrap().contains("bad password"));

        let state = executor.state();
        assert_eq!(state.retry_count, 1);
        // Authentication failures are not retryable regardless of the flag.
        assert!(!state.can_retry);
    }

    #[tokio::test]
    async fn test_success_resets_retry_count_after_failures() {
        let executor = OperationExecutor::<u32>::new();

        for _ in 0..2 {
            executor
                .execute(
                    || async { Err(AuthError::Network("down".into())) },
                    OperationClass::Loading,
                    true,
                )
                .await;
        }
        assert_eq!(executor.state().retry_count, 2);

        let result = executor
            .execute(|| async { Ok(1) }, OperationClass::Loading, true)
            .await;

        assert!(result.success);
        assert_eq!(executor.state().retry_count, 0);
    }

    #[tokio::test]
    async fn test_retry_ceiling_blocks_fourth_attempt() {
        let executor = OperationExecutor::<u32>::new();
        let invocations = Arc::new(AtomicU32::new(0));

        let counter = invocations.clone();
        executor
            .execute(
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(AuthError::Network("down".into()))
                    }
                },
                OperationClass::Refreshing,
                true,
            )
            .await;

        // Two retries bring the consecutive failure count to the ceiling.
        executor.retry().await;
        executor.retry().await;

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(executor.state().retry_count, 3);
        assert!(!executor.state().can_retry);

        // The fourth attempt fails fast without invoking the operation.
        let result = executor.retry().await;
        assert!(!result.success);
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_reinvokes_stored_operation() {
        let executor = OperationExecutor::<u32>::new();
        let invocations = Arc::new(AtomicU32::new(0));

        let counter = invocations.clone();
        executor
            .execute(
                move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(AuthError::Network("first try fails".into()))
                        } else {
                            Ok(99)
                        }
                    }
                },
                OperationClass::Refreshing,
                true,
            )
            .await;

        let result = executor.retry().await;
        assert!(result.success);
        assert_eq!(result.data, Some(99));
        assert_eq!(invocations.load(Ordering::SeqCst), 2);

        // Success clears the stored operation.
        let result = executor.retry().await;
        assert!(!result.success);
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_without_stored_operation_fails_fast() {
        let executor = OperationExecutor::<u32>::new();
        let result = executor.retry().await;

        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_non_retryable_flag_prevents_storage() {
        let executor = OperationExecutor::<u32>::new();
        let invocations = Arc::new(AtomicU32::new(0));

        let counter = invocations.clone();
        executor
            .execute(
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(AuthError::Network("down".into()))
                    }
                },
                OperationClass::Loading,
                false,
            )
            .await;

        let result = executor.retry().await;
        assert!(!result.success);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_class_flag_held_for_operation_duration() {
        let executor = Arc::new(OperationExecutor::<u32>::new());
        let gate = Arc::new(tokio::sync::Notify::new());

        let task_executor = executor.clone();
        let task_gate = gate.clone();
        let task = tokio::spawn(async move {
            task_executor
                .execute(
                    move || {
                        let gate = task_gate.clone();
                        async move {
                            gate.notified().await;
                            Ok(7)
                        }
                    },
                    OperationClass::Refreshing,
                    false,
                )
                .await
        });

        // Wait for the flag to appear, then release the operation.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !executor.state().is_refreshing {
            assert!(tokio::time::Instant::now() < deadline, "flag never set");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        gate.notify_one();

        let result = task.await.unwrap();
        assert!(result.success);
        assert!(!executor.state().is_refreshing);
    }

    #[tokio::test]
    async fn test_failure_result_carries_classified_hints() {
        let executor = OperationExecutor::<u32>::new();

        let result = executor
            .execute(
                || async { Err(AuthError::RateLimited { retry_after: 15 }) },
                OperationClass::Authenticating,
                true,
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.retry_after, Some(15));
        assert!(!result.requires_captcha);

        let result = executor
            .execute(
                || async { Err(AuthError::CaptchaRequired) },
                OperationClass::Authenticating,
                true,
            )
            .await;

        assert!(result.requires_captcha);
        assert!(!executor.state().can_retry);
    }

    #[tokio::test]
    async fn test_clear_error() {
        let executor = OperationExecutor::<u32>::new();

        executor
            .execute(
                || async { Err(AuthError::Network("down".into())) },
                OperationClass::Loading,
                true,
            )
            .await;
        assert!(executor.state().error.is_some());

        executor.clear_error();
        let state = executor.state();
        assert!(state.error.is_none());
        assert!(state.last_error.is_none());
        // Retry bookkeeping is untouched.
        assert_eq!(state.retry_count, 1);
    }
}
