use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use prometheus::{register_gauge_vec, GaugeVec};

static STATE_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "auth_circuit_breaker_state",
        "State of the authorization circuit breaker",
        &["name", "state"]
    )
    .expect("auth_circuit_breaker_state registered twice")
});

static COUNT_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "auth_circuit_breaker_count",
        "Circuit breaker request count",
        &["type"]
    )
    .expect("auth_circuit_breaker_count registered twice")
});

#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Closed trips to open once `consecutive_failures` exceeds this.
    pub failure_threshold: u32,
    /// How long an open breaker stays open before admitting a probe.
    pub open_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// Call counters. Monotonic between state transitions, zeroed on transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker refused the call without invoking the operation.
    Open,
    /// The operation ran and failed.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerError::Open => write!(f, "circuit breaker is open"),
            BreakerError::Inner(err) => err.fmt(f),
        }
    }
}

struct Inner {
    state: BreakerState,
    counts: Counts,
    opened_at: Option<Instant>,
    half_open_probes: u32,
}

/// Named circuit breaker over any fallible async operation.
///
/// Closed passes calls through; after `failure_threshold` is exceeded by
/// consecutive failures the breaker opens and fails fast. Once `open_timeout`
/// elapses a single probe is admitted: success closes the breaker, failure
/// re-opens it.
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, BreakerSettings::default())
    }

    pub fn with_settings(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                counts: Counts::default(),
                opened_at: None,
                half_open_probes: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, accounting for an elapsed open timeout.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.locked();
        self.refresh_state(&mut inner);
        inner.state
    }

    pub fn counts(&self) -> Counts {
        self.locked().counts
    }

    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            self.publish();
            return Err(BreakerError::Open);
        }

        // releases the half-open probe slot if the caller is cancelled
        // mid-call, so a dropped probe cannot wedge the breaker
        let mut admission = Admission {
            breaker: self,
            done: false,
        };
        let result = op().await;
        admission.done = true;

        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        self.publish();
        result.map_err(BreakerError::Inner)
    }

    fn admit(&self) -> bool {
        let mut inner = self.locked();
        self.refresh_state(&mut inner);
        match inner.state {
            BreakerState::Open => false,
            BreakerState::HalfOpen if inner.half_open_probes > 0 => false,
            BreakerState::HalfOpen => {
                inner.half_open_probes += 1;
                inner.counts.requests += 1;
                true
            }
            BreakerState::Closed => {
                inner.counts.requests += 1;
                true
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.locked();
        inner.counts.total_successes += 1;
        inner.counts.consecutive_successes += 1;
        inner.counts.consecutive_failures = 0;
        if inner.state == BreakerState::HalfOpen {
            self.transition(&mut inner, BreakerState::Closed);
        }
    }

    fn on_failure(&self) {
        let mut inner = self.locked();
        inner.counts.total_failures += 1;
        inner.counts.consecutive_failures += 1;
        inner.counts.consecutive_successes = 0;
        match inner.state {
            BreakerState::HalfOpen => self.transition(&mut inner, BreakerState::Open),
            BreakerState::Closed
                if inner.counts.consecutive_failures > self.settings.failure_threshold =>
            {
                self.transition(&mut inner, BreakerState::Open)
            }
            _ => {}
        }
    }

    fn refresh_state(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
            if elapsed >= self.settings.open_timeout {
                self.transition(inner, BreakerState::HalfOpen);
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        if inner.state == to {
            return;
        }
        if to == BreakerState::Open {
            tracing::warn!(
                name = %self.name,
                from = inner.state.as_str(),
                "circuit breaker opened"
            );
        } else {
            tracing::info!(
                name = %self.name,
                from = inner.state.as_str(),
                to = to.as_str(),
                "circuit breaker state change"
            );
        }
        inner.state = to;
        inner.counts = Counts::default();
        inner.half_open_probes = 0;
        inner.opened_at = (to == BreakerState::Open).then(Instant::now);
    }

    fn publish(&self) {
        let (state, counts) = {
            let mut inner = self.locked();
            self.refresh_state(&mut inner);
            (inner.state, inner.counts)
        };

        for candidate in [
            BreakerState::Closed,
            BreakerState::Open,
            BreakerState::HalfOpen,
        ] {
            let value = if candidate == state { 1.0 } else { 0.0 };
            STATE_GAUGE
                .with_label_values(&[self.name.as_str(), candidate.as_str()])
                .set(value);
        }

        COUNT_GAUGE
            .with_label_values(&["requests"])
            .set(counts.requests as f64);
        COUNT_GAUGE
            .with_label_values(&["total_successes"])
            .set(counts.total_successes as f64);
        COUNT_GAUGE
            .with_label_values(&["total_failures"])
            .set(counts.total_failures as f64);
        COUNT_GAUGE
            .with_label_values(&["consecutive_successes"])
            .set(counts.consecutive_successes as f64);
        COUNT_GAUGE
            .with_label_values(&["consecutive_failures"])
            .set(counts.consecutive_failures as f64);
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    done: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut inner = self.breaker.locked();
        if inner.state == BreakerState::HalfOpen && inner.half_open_probes > 0 {
            inner.half_open_probes -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlock;
    use prometheus::TextEncoder;

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Err::<(), _>("something went wrong") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<&'static str, BreakerError<&'static str>> {
        breaker.execute(|| async { Ok::<_, &'static str>("okay") }).await
    }

    fn gathered() -> String {
        TextEncoder::new()
            .encode_to_string(&prometheus::gather())
            .unwrap()
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let _guard = testlock::metrics();
        let breaker = CircuitBreaker::new("cb-open-test");

        for _ in 0..10 {
            let _ = fail(&breaker).await;
        }

        assert_eq!(breaker.state(), BreakerState::Open);
        // counters reset on the transition, fast-fails do not count
        assert_eq!(breaker.counts(), Counts::default());

        let metrics = gathered();
        assert!(metrics
            .contains(r#"auth_circuit_breaker_state{name="cb-open-test",state="open"} 1"#));
        assert!(metrics
            .contains(r#"auth_circuit_breaker_state{name="cb-open-test",state="closed"} 0"#));
    }

    #[tokio::test]
    async fn stays_closed_on_success() {
        let _guard = testlock::metrics();
        let breaker = CircuitBreaker::new("cb-closed-test");

        for _ in 0..10 {
            succeed(&breaker).await.unwrap();
        }

        assert_eq!(breaker.state(), BreakerState::Closed);
        let counts = breaker.counts();
        assert_eq!(counts.requests, 10);
        assert_eq!(counts.total_successes, 10);
        assert_eq!(counts.consecutive_successes, 10);
        assert_eq!(counts.total_failures, 0);

        let metrics = gathered();
        assert!(metrics.contains(r#"auth_circuit_breaker_count{type="requests"} 10"#));
        assert!(metrics.contains(r#"auth_circuit_breaker_count{type="total_successes"} 10"#));
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_calling() {
        let _guard = testlock::metrics();
        let breaker = CircuitBreaker::new("cb-fast-fail-test");

        for _ in 0..6 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let called = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .execute(|| async {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, &'static str>("unreachable")
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open)));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn half_open_after_timeout() {
        let _guard = testlock::metrics();
        let breaker = CircuitBreaker::with_settings(
            "cb-timeout-test",
            BreakerSettings {
                failure_threshold: 5,
                open_timeout: Duration::from_millis(300),
            },
        );

        for _ in 0..10 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(310)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn probe_success_closes_probe_failure_reopens() {
        let _guard = testlock::metrics();
        let settings = BreakerSettings {
            failure_threshold: 2,
            open_timeout: Duration::from_millis(50),
        };

        let breaker = CircuitBreaker::with_settings("cb-probe-success-test", settings);
        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);

        let breaker = CircuitBreaker::with_settings("cb-probe-failure-test", settings);
        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn cancelled_probe_releases_the_half_open_slot() {
        let _guard = testlock::metrics();
        let breaker = CircuitBreaker::with_settings(
            "cb-cancel-test",
            BreakerSettings {
                failure_threshold: 2,
                open_timeout: Duration::from_millis(50),
            },
        );

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // a probe whose caller goes away mid-call
        let hung_probe = breaker.execute(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, &'static str>("late")
        });
        let _ = tokio::time::timeout(Duration::from_millis(10), hung_probe).await;

        // the slot is free again: a fresh probe closes the breaker
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn configured_threshold_is_honored() {
        let _guard = testlock::metrics();
        let breaker = CircuitBreaker::with_settings(
            "cb-threshold-test",
            BreakerSettings {
                failure_threshold: 50,
                open_timeout: Duration::from_secs(60),
            },
        );

        for _ in 0..10 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
