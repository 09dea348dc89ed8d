//! Retry policy: backoff delays, retryability classification, and the
//! wall-clock budget check. Pure functions over attempt state so the policy
//! is testable without a runtime.

use crate::config::FeatureFlags;
use crate::error::ErrorCode;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
    /// Cap on cumulative attempt + backoff wall time.
    pub total_timeout_ms: i64,
    pub max_retries: i32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 5000,
            total_timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    advanced: bool,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, flags: &FeatureFlags) -> Self {
        RetryPolicy {
            config,
            advanced: flags.advanced_retry,
        }
    }

    /// Policy for one request: the request timeout is the retry budget and
    /// its retry count the attempt cap.
    pub fn for_request(timeout_ms: i64, retry_count: i32, flags: &FeatureFlags) -> Self {
        RetryPolicy::new(
            RetryConfig {
                total_timeout_ms: timeout_ms,
                max_retries: retry_count,
                ..RetryConfig::default()
            },
            flags,
        )
    }

    /// Backoff before retrying `attempt` (0-based). Exponential with
    /// saturation when advanced retry is on, else the baseline linear ramp.
    pub fn backoff_delay_ms(&self, attempt: i32) -> i64 {
        if !self.advanced {
            return 100 * (attempt as i64 + 1);
        }
        let shift = attempt.clamp(0, 62) as u32;
        let delay = self.config.base_delay_ms.saturating_mul(1i64 << shift);
        delay.min(self.config.max_delay_ms)
    }

    /// Classify an error outcome. The parsed HTTP status, when present,
    /// overrides the code: 4xx never retries, 5xx always does.
    pub fn is_retryable(&self, error_code: ErrorCode, http_status: u16) -> bool {
        if !self.advanced {
            // Baseline behavior: retry everything.
            return true;
        }

        if (400..500).contains(&http_status) {
            return false;
        }
        if http_status >= 500 {
            return true;
        }

        match error_code {
            ErrorCode::NetworkError | ErrorCode::ConnectionTimeout => true,
            ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFormat => false,
            ErrorCode::PermissionDenied | ErrorCode::QuotaExceeded => false,
            ErrorCode::ExecutionFailed | ErrorCode::ResourceUnavailable => true,
            ErrorCode::InternalError | ErrorCode::SystemOverload => true,
            ErrorCode::CancelledByUser | ErrorCode::CancelledByTimeout => false,
            // Unknown outcomes default to retryable.
            ErrorCode::None | ErrorCode::HttpError => true,
        }
    }

    /// True when no further attempt fits in the budget: either the elapsed
    /// time already exceeds it, or the next backoff would.
    pub fn is_budget_exhausted(&self, elapsed_ms: i64, attempt: i32) -> bool {
        if !self.advanced {
            return false;
        }
        if elapsed_ms >= self.config.total_timeout_ms {
            return true;
        }
        elapsed_ms + self.backoff_delay_ms(attempt) >= self.config.total_timeout_ms
    }

    pub fn max_retries(&self) -> i32 {
        self.config.max_retries
    }

    pub fn total_timeout_ms(&self) -> i64 {
        self.config.total_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advanced() -> FeatureFlags {
        FeatureFlags {
            advanced_retry: true,
            ..FeatureFlags::default()
        }
    }

    #[test]
    fn test_exponential_backoff_with_cap() {
        let policy = RetryPolicy::new(RetryConfig::default(), &advanced());
        assert_eq!(policy.backoff_delay_ms(0), 100);
        assert_eq!(policy.backoff_delay_ms(1), 200);
        assert_eq!(policy.backoff_delay_ms(2), 400);
        assert_eq!(policy.backoff_delay_ms(5), 3200);
        assert_eq!(policy.backoff_delay_ms(6), 5000);
        assert_eq!(policy.backoff_delay_ms(30), 5000);
    }

    #[test]
    fn test_backoff_monotonically_non_decreasing() {
        let policy = RetryPolicy::new(RetryConfig::default(), &advanced());
        let mut last = 0;
        for attempt in 0..20 {
            let delay = policy.backoff_delay_ms(attempt);
            assert!(delay >= last, "delay regressed at attempt {attempt}");
            last = delay;
        }
    }

    #[test]
    fn test_linear_backoff_when_disabled() {
        let policy = RetryPolicy::new(RetryConfig::default(), &FeatureFlags::default());
        assert_eq!(policy.backoff_delay_ms(0), 100);
        assert_eq!(policy.backoff_delay_ms(1), 200);
        assert_eq!(policy.backoff_delay_ms(2), 300);
    }

    #[test]
    fn test_classification_table() {
        let policy = RetryPolicy::new(RetryConfig::default(), &advanced());
        assert!(!policy.is_retryable(ErrorCode::InvalidInput, 0));
        assert!(!policy.is_retryable(ErrorCode::MissingRequiredField, 0));
        assert!(!policy.is_retryable(ErrorCode::PermissionDenied, 0));
        assert!(!policy.is_retryable(ErrorCode::CancelledByUser, 0));
        assert!(!policy.is_retryable(ErrorCode::CancelledByTimeout, 0));
        assert!(policy.is_retryable(ErrorCode::NetworkError, 0));
        assert!(policy.is_retryable(ErrorCode::ConnectionTimeout, 0));
        assert!(policy.is_retryable(ErrorCode::ExecutionFailed, 0));
        assert!(policy.is_retryable(ErrorCode::SystemOverload, 0));
    }

    #[test]
    fn test_http_status_overrides_code() {
        let policy = RetryPolicy::new(RetryConfig::default(), &advanced());
        // 4xx is never retryable even for a retryable code.
        assert!(!policy.is_retryable(ErrorCode::HttpError, 404));
        assert!(!policy.is_retryable(ErrorCode::NetworkError, 429));
        // 5xx is always retryable.
        assert!(policy.is_retryable(ErrorCode::HttpError, 500));
        assert!(policy.is_retryable(ErrorCode::HttpError, 503));
    }

    #[test]
    fn test_everything_retries_when_disabled() {
        let policy = RetryPolicy::new(RetryConfig::default(), &FeatureFlags::default());
        assert!(policy.is_retryable(ErrorCode::InvalidInput, 404));
        assert!(policy.is_retryable(ErrorCode::PermissionDenied, 0));
    }

    #[test]
    fn test_budget_exhaustion() {
        let policy = RetryPolicy::new(
            RetryConfig {
                total_timeout_ms: 1000,
                ..RetryConfig::default()
            },
            &advanced(),
        );
        assert!(!policy.is_budget_exhausted(0, 0));
        assert!(policy.is_budget_exhausted(1000, 0));
        assert!(policy.is_budget_exhausted(1500, 0));
        // 900 elapsed + 100 backoff reaches the budget.
        assert!(policy.is_budget_exhausted(900, 0));
        assert!(!policy.is_budget_exhausted(800, 0));
        // Larger backoff at later attempts exhausts earlier.
        assert!(policy.is_budget_exhausted(700, 2));
    }

    #[test]
    fn test_budget_never_exhausted_when_disabled() {
        let policy = RetryPolicy::new(
            RetryConfig {
                total_timeout_ms: 10,
                ..RetryConfig::default()
            },
            &FeatureFlags::default(),
        );
        assert!(!policy.is_budget_exhausted(1_000_000, 50));
    }
}
