// Error taxonomy for authentication operations
// Structured error kinds are the primary contract; free-form backend
// messages are adapted through `AuthError::classify`.

use thiserror::Error;

/// Number of consecutive retryable failures after which an operation
/// can no longer be retried.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Classified authentication failure.
///
/// Backends should return these kinds directly. `classify` exists for
/// backends that can only surface a message string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Transport failure reaching the identity backend.
    #[error("network error: {0}")]
    Network(String),

    /// Credentials rejected or expired mid-flow. Requires a fresh sign-in.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Operation rejected due to insufficient rights.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Malformed input caught before or by the backend.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Backend signalled throttling. Retryable after the given delay.
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// The principal must complete an out-of-band verification step.
    #[error("verification required: {0}")]
    VerificationRequired(String),

    /// The backend challenged the request as automated traffic.
    #[error("captcha challenge required")]
    CaptchaRequired,

    /// Uncategorized failure.
    #[error("{0}")]
    Unknown(String),
}

impl AuthError {
    /// Whether re-invoking the same operation unchanged may succeed.
    pub fn retryable(&self) -> bool {
        match self {
            AuthError::Network(_) | AuthError::RateLimited { .. } | AuthError::Unknown(_) => true,
            AuthError::Authentication(_)
            | AuthError::Authorization(_)
            | AuthError::Validation(_)
            | AuthError::VerificationRequired(_)
            | AuthError::CaptchaRequired => false,
        }
    }

    /// Backend-specified delay before a retry is worthwhile, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AuthError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn requires_verification(&self) -> bool {
        matches!(self, AuthError::VerificationRequired(_))
    }

    pub fn requires_captcha(&self) -> bool {
        matches!(self, AuthError::CaptchaRequired)
    }

    /// Best-effort classification of a free-form backend message.
    ///
    /// Fallback path only; backends that speak `AuthError` directly never
    /// go through here.
    pub fn classify(message: &str) -> AuthError {
        let lower = message.to_lowercase();

        if lower.contains("captcha") || lower.contains("bot check") {
            return AuthError::CaptchaRequired;
        }
        if lower.contains("rate limit") || lower.contains("too many requests") {
            // Delay not recoverable from the message; use a conservative floor.
            return AuthError::RateLimited { retry_after: 30 };
        }
        if lower.contains("verify") || lower.contains("verification") {
            return AuthError::VerificationRequired(message.to_string());
        }
        if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connection")
            || lower.contains("unreachable")
        {
            return AuthError::Network(message.to_string());
        }
        if lower.contains("credential")
            || lower.contains("password")
            || lower.contains("token expired")
            || lower.contains("unauthenticated")
        {
            return AuthError::Authentication(message.to_string());
        }
        if lower.contains("forbidden") || lower.contains("permission") {
            return AuthError::Authorization(message.to_string());
        }
        if lower.contains("invalid") || lower.contains("malformed") {
            return AuthError::Validation(message.to_string());
        }

        AuthError::Unknown(message.to_string())
    }
}
