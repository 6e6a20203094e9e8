//! Rate limiter types and window arithmetic

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Fixed-window bucket id for a timestamp.
///
/// All timestamps inside one window map to the same bucket; the first
/// timestamp past the window boundary starts a fresh bucket, which is what
/// resets the counter.
pub fn window_bucket(now_secs: u64, window_secs: u64) -> u64 {
    now_secs / window_secs.max(1)
}

/// Which identity a limit applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitScope {
    Team,
    Session,
}

impl LimitScope {
    /// Scope name used in counter keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Team => "team",
            LimitScope::Session => "session",
        }
    }
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateCheck {
    /// Whether this operation pushed the identity over its limit
    pub over: bool,
    /// Post-increment count in the current window (0 when the counter
    /// backend was unavailable)
    pub count: u64,
    /// The limit that was applied
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_stable_within_a_window() {
        assert_eq!(window_bucket(0, 60), window_bucket(59, 60));
    }

    #[test]
    fn bucket_advances_at_the_window_boundary() {
        assert_eq!(window_bucket(59, 60), 0);
        assert_eq!(window_bucket(60, 60), 1);
        assert_eq!(window_bucket(121, 60), 2);
    }

    #[test]
    fn zero_window_does_not_divide_by_zero() {
        assert_eq!(window_bucket(100, 0), 100);
    }
}
