//! Lockout policy for signup-code confirmation.
//!
//! Pure functions over the attempt pair; callers own persistence.

use time::{Duration, OffsetDateTime};

/// Attempts allowed inside one window before further attempts are refused.
pub const MAX_ATTEMPTS: i32 = 3;
/// Sliding window measured from the most recent attempt.
pub const LOCKOUT_WINDOW: Duration = Duration::minutes(5);

/// Attempt counter and timestamp of the latest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    pub count: i32,
    pub last_at: Option<OffsetDateTime>,
}

pub fn is_locked(count: i32, last_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    count >= MAX_ATTEMPTS && last_at.is_some_and(|at| now - at < LOCKOUT_WINDOW)
}

/// State after recording one more attempt at `now`.
pub fn next_attempt(current: AttemptState, now: OffsetDateTime) -> AttemptState {
    let count = match current.last_at {
        Some(at) if now - at >= LOCKOUT_WINDOW => 1,
        _ => current.count + 1,
    };
    AttemptState {
        count,
        last_at: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

    #[test]
    fn fresh_record_is_not_locked() {
        assert!(!is_locked(0, None, T0));
    }

    #[test]
    fn locked_after_three_attempts_inside_window() {
        assert!(is_locked(3, Some(T0), T0 + Duration::minutes(4)));
        assert!(is_locked(7, Some(T0), T0 + Duration::seconds(299)));
    }

    #[test]
    fn window_boundary_unlocks() {
        assert!(!is_locked(3, Some(T0), T0 + Duration::minutes(5)));
    }

    #[test]
    fn below_limit_never_locks() {
        assert!(!is_locked(2, Some(T0), T0));
    }

    #[test]
    fn high_count_without_timestamp_is_not_locked() {
        assert!(!is_locked(5, None, T0));
    }

    #[test]
    fn next_attempt_increments_inside_window() {
        let current = AttemptState { count: 1, last_at: Some(T0) };
        let now = T0 + Duration::minutes(2);
        assert_eq!(next_attempt(current, now), AttemptState { count: 2, last_at: Some(now) });
    }

    #[test]
    fn next_attempt_resets_after_window() {
        let current = AttemptState { count: 3, last_at: Some(T0) };
        let now = T0 + Duration::minutes(5);
        assert_eq!(next_attempt(current, now), AttemptState { count: 1, last_at: Some(now) });
    }

    #[test]
    fn first_attempt_counts_from_zero() {
        let current = AttemptState { count: 0, last_at: None };
        assert_eq!(next_attempt(current, T0).count, 1);
    }
}
