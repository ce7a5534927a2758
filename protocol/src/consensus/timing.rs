//! Round clock.
//!
//! Rounds are wall-clock slots: `round = floor(unix_ms / interval_ms)`.
//! Nodes with synchronized clocks agree on round boundaries without ever
//! talking about time.

use std::time::Duration;

use super::types::Round;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn interval_ms(interval: Duration) -> u64 {
    (interval.as_millis() as u64).max(1)
}

/// Round index containing instant `at_ms`.
pub fn round_index(at_ms: u64, interval: Duration) -> Round {
    at_ms / interval_ms(interval)
}

/// First millisecond of `round`.
pub fn round_start_ms(round: Round, interval: Duration) -> u64 {
    round.saturating_mul(interval_ms(interval))
}

/// Whether wall-clock time has reached the start of `round`.
pub fn round_reached(round: Round, interval: Duration) -> bool {
    now_ms() >= round_start_ms(round, interval)
}

/// When a requested round may begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDecision {
    /// Target is current or past: run the current round now.
    Now(Round),
    /// Target is the next round: start it early, during the current one.
    Early(Round),
    /// Target is further out: wait until this instant and decide again.
    WaitUntil(u64),
}

/// Pure start rule for a target round at instant `at_ms`.
pub fn decide_start(target: Round, at_ms: u64, interval: Duration) -> StartDecision {
    let current = round_index(at_ms, interval);
    if target <= current {
        StartDecision::Now(current)
    } else if target == current + 1 {
        StartDecision::Early(target)
    } else {
        StartDecision::WaitUntil(round_start_ms(current + 1, interval))
    }
}

/// Resolve the round to run for `target`, sleeping across boundaries as
/// needed.
pub async fn next_round_to_run(target: Round, interval: Duration) -> Round {
    loop {
        match decide_start(target, now_ms(), interval) {
            StartDecision::Now(round) | StartDecision::Early(round) => return round,
            StartDecision::WaitUntil(at_ms) => sleep_until_ms(at_ms).await,
        }
    }
}

/// Sleep until `round` starts. Returns immediately if it already has.
pub async fn sleep_until_round(round: Round, interval: Duration) {
    sleep_until_ms(round_start_ms(round, interval)).await
}

async fn sleep_until_ms(at_ms: u64) {
    let now = now_ms();
    if at_ms > now {
        tokio::time::sleep(Duration::from_millis(at_ms - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_round_index_floors() {
        assert_eq!(round_index(0, SECOND), 0);
        assert_eq!(round_index(999, SECOND), 0);
        assert_eq!(round_index(1_000, SECOND), 1);
        assert_eq!(round_index(5_500, Duration::from_secs(2)), 2);
    }

    #[test]
    fn test_round_start() {
        assert_eq!(round_start_ms(3, Duration::from_secs(2)), 6_000);
        assert_eq!(round_start_ms(u64::MAX, SECOND), u64::MAX);
    }

    #[test]
    fn test_start_rules() {
        // At 10.5 s the current round is 10.
        let at = 10_500;
        assert_eq!(decide_start(0, at, SECOND), StartDecision::Now(10));
        assert_eq!(decide_start(10, at, SECOND), StartDecision::Now(10));
        assert_eq!(decide_start(11, at, SECOND), StartDecision::Early(11));
        assert_eq!(decide_start(12, at, SECOND), StartDecision::WaitUntil(11_000));
    }

    #[test]
    fn test_zero_interval_does_not_divide_by_zero() {
        assert_eq!(round_index(42, Duration::ZERO), 42);
    }

    #[tokio::test]
    async fn test_next_round_to_run_returns_current_for_past_target() {
        let interval = Duration::from_secs(3_600);
        let current = round_index(now_ms(), interval);
        assert_eq!(next_round_to_run(0, interval).await, current);
        assert_eq!(next_round_to_run(current + 1, interval).await, current + 1);
    }

    #[tokio::test]
    async fn test_sleep_until_past_round_is_immediate() {
        let started = std::time::Instant::now();
        sleep_until_round(1, SECOND).await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
