//! Per-operation deadline policy. Filesystem operations get fixed deadlines
//! per operation kind; HTTP splits connect and total timeouts. All of it is
//! gated behind the complete-timeout flag; when off, the request-level
//! timeout is the only bound.

use std::time::Duration;

use crate::config::FeatureFlags;

/// Filesystem operation kinds with distinct deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    Read,
    Write,
    Delete,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    complete_timeout: bool,
}

impl TimeoutPolicy {
    pub fn new(flags: &FeatureFlags) -> Self {
        TimeoutPolicy {
            complete_timeout: flags.complete_timeout,
        }
    }

    /// Deadline for one filesystem operation, or `None` when per-op
    /// enforcement is disabled (callers fall back to the request timeout).
    pub fn fs_deadline(&self, op: FsOp) -> Option<Duration> {
        if !self.complete_timeout {
            return None;
        }
        let ms = match op {
            FsOp::Read => 5000,
            FsOp::Write => 10_000,
            FsOp::Delete => 3000,
        };
        Some(Duration::from_millis(ms))
    }

    /// HTTP connection-establishment timeout, when split timeouts are on.
    pub fn http_connect_timeout(&self) -> Option<Duration> {
        self.complete_timeout.then(|| Duration::from_millis(5000))
    }

    /// Total HTTP deadline: connect timeout plus whatever remains of the
    /// request timeout after connection establishment.
    pub fn http_total_timeout(&self, request_timeout_ms: i64) -> Duration {
        let request = request_timeout_ms.max(0) as u64;
        match self.http_connect_timeout() {
            Some(connect) => {
                let connect_ms = connect.as_millis() as u64;
                Duration::from_millis(connect_ms + request.saturating_sub(connect_ms))
            }
            None => Duration::from_millis(request),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.complete_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> TimeoutPolicy {
        TimeoutPolicy::new(&FeatureFlags {
            complete_timeout: true,
            ..FeatureFlags::default()
        })
    }

    #[test]
    fn test_fs_deadlines_per_op() {
        let policy = enabled();
        assert_eq!(policy.fs_deadline(FsOp::Read), Some(Duration::from_millis(5000)));
        assert_eq!(
            policy.fs_deadline(FsOp::Write),
            Some(Duration::from_millis(10_000))
        );
        assert_eq!(
            policy.fs_deadline(FsOp::Delete),
            Some(Duration::from_millis(3000))
        );
    }

    #[test]
    fn test_fs_deadline_disabled() {
        let policy = TimeoutPolicy::new(&FeatureFlags::default());
        assert_eq!(policy.fs_deadline(FsOp::Read), None);
        assert_eq!(policy.http_connect_timeout(), None);
    }

    #[test]
    fn test_http_total_composition() {
        let policy = enabled();
        // 30s request: 5s connect + 25s remaining.
        assert_eq!(
            policy.http_total_timeout(30_000),
            Duration::from_millis(30_000)
        );
        // Request shorter than the connect window never goes negative.
        assert_eq!(
            policy.http_total_timeout(2000),
            Duration::from_millis(5000)
        );
    }

    #[test]
    fn test_http_total_disabled_uses_request_timeout() {
        let policy = TimeoutPolicy::new(&FeatureFlags::default());
        assert_eq!(
            policy.http_total_timeout(1234),
            Duration::from_millis(1234)
        );
    }
}
