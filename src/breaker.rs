// =============================================================================
// Circuit Breaker — three-state fault isolation wrapper
// =============================================================================
//
// closed    normal operation; consecutive failures inside the window count
//           toward the trip threshold
// open      calls are refused until the cooldown elapses
// half-open one probe call is admitted; success closes the breaker, any
//           failure reopens it
//
// Each strategy and the publisher own an independent breaker, so one
// failing component sheds load without touching the others.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Snapshot for the heartbeat and metrics surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerInfo {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    first_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    name: String,
    /// Consecutive failures inside the window that trip the breaker.
    failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    window: Duration,
    /// Time spent open before a half-open probe is admitted.
    cooldown: Duration,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        window: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            window,
            cooldown,
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                first_failure_at: None,
                opened_at: None,
            }),
        }
    }

    /// Defaults used for strategy and publisher breakers: 5 consecutive
    /// failures within 60s trip it, 30s cooldown.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, 5, Duration::seconds(60), Duration::seconds(30))
    }

    /// Whether a call may proceed. Transitions open -> half-open once the
    /// cooldown has elapsed.
    pub fn allow(&self) -> bool {
        self.allow_at(Utc::now())
    }

    pub fn allow_at(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| now - at >= self.cooldown);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    info!(breaker = %self.name, "breaker half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        if inner.state == BreakerState::HalfOpen {
            info!(breaker = %self.name, "breaker closed after successful probe");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.first_failure_at = None;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Utc::now());
    }

    pub fn record_failure_at(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                warn!(breaker = %self.name, "probe failed, breaker reopened");
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                // Failures outside the window restart the count.
                let window_expired = inner
                    .first_failure_at
                    .is_some_and(|at| now - at > self.window);
                if window_expired || inner.first_failure_at.is_none() {
                    inner.consecutive_failures = 0;
                    inner.first_failure_at = Some(now);
                }
                inner.consecutive_failures += 1;

                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "breaker tripped open"
                    );
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }

    pub fn snapshot(&self) -> BreakerInfo {
        let inner = self.inner.read();
        BreakerInfo {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", 3, Duration::seconds(60), Duration::seconds(30))
    }

    #[test]
    fn trips_after_threshold_consecutive_failures() {
        let b = breaker();
        let t0 = Utc::now();

        b.record_failure_at(t0);
        b.record_failure_at(t0 + Duration::seconds(1));
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow_at(t0 + Duration::seconds(2)));

        b.record_failure_at(t0 + Duration::seconds(2));
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow_at(t0 + Duration::seconds(3)));
    }

    #[test]
    fn success_resets_the_count() {
        let b = breaker();
        let t0 = Utc::now();
        b.record_failure_at(t0);
        b.record_failure_at(t0 + Duration::seconds(1));
        b.record_success();
        b.record_failure_at(t0 + Duration::seconds(2));
        b.record_failure_at(t0 + Duration::seconds(3));
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn failures_outside_window_restart_the_count() {
        let b = breaker();
        let t0 = Utc::now();
        b.record_failure_at(t0);
        b.record_failure_at(t0 + Duration::seconds(1));
        // Third failure arrives 2 minutes later: window expired, count
        // restarts at 1 and the breaker stays closed.
        b.record_failure_at(t0 + Duration::seconds(120));
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let b = breaker();
        let t0 = Utc::now();
        for i in 0..3 {
            b.record_failure_at(t0 + Duration::seconds(i));
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow_at(t0 + Duration::seconds(10)));

        // Cooldown elapsed: probe admitted.
        assert!(b.allow_at(t0 + Duration::seconds(40)));
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow_at(t0 + Duration::seconds(41)));
    }

    #[test]
    fn half_open_probe_reopens_on_failure() {
        let b = breaker();
        let t0 = Utc::now();
        for i in 0..3 {
            b.record_failure_at(t0 + Duration::seconds(i));
        }
        assert!(b.allow_at(t0 + Duration::seconds(40)));
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.record_failure_at(t0 + Duration::seconds(41));
        assert_eq!(b.state(), BreakerState::Open);
        // Cooldown restarts from the reopen.
        assert!(!b.allow_at(t0 + Duration::seconds(60)));
        assert!(b.allow_at(t0 + Duration::seconds(75)));
    }
}
