//! Protected invocation
//!
//! A [`CallGate`] asks its breaker for admission, runs the operation if
//! allowed, and reports the outcome back. Rejections surface as the error
//! that opened the circuit, so callers handle breaker-triggered and
//! operation-triggered failures the same way.
//!
//! The breaker lock is taken only inside `admit()` and `record()`; it is
//! never held while the operation runs, nor while transition hooks run.

use crate::{
    Outcome,
    circuit::{Admission, CircuitBreaker, Permit},
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

/// A breaker shared between every call site of one resource
pub type SharedBreaker<E> = Arc<Mutex<CircuitBreaker<E>>>;

/// Runs operations under a shared circuit breaker
///
/// Cloning a gate shares its breaker.
pub struct CallGate<E> {
    breaker: SharedBreaker<E>,
}

impl<E> Clone for CallGate<E> {
    fn clone(&self) -> Self {
        Self {
            breaker: Arc::clone(&self.breaker),
        }
    }
}

impl<E> std::fmt::Debug for CallGate<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CallGate").field(&*self.breaker.lock()).finish()
    }
}

impl<E: Clone> CallGate<E> {
    /// Gate over a breaker it will share with its clones
    pub fn new(breaker: CircuitBreaker<E>) -> Self {
        Self::with_shared(Arc::new(Mutex::new(breaker)))
    }

    /// Gate over a breaker owned elsewhere
    pub fn with_shared(breaker: SharedBreaker<E>) -> Self {
        Self { breaker }
    }

    pub fn breaker(&self) -> &SharedBreaker<E> {
        &self.breaker
    }

    /// Run an async operation with circuit protection
    ///
    /// The outcome is recorded only after the operation's future settles.
    /// If the returned future is dropped first, the permit is released
    /// without recording anything.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let in_flight = self.enter()?;
        let result = operation().await;
        in_flight.settle(Outcome::of(&result));
        result
    }

    /// Run a synchronous operation with circuit protection
    ///
    /// A panicking operation releases its permit and records nothing.
    pub fn call<T, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let in_flight = self.enter()?;
        let result = operation();
        in_flight.settle(Outcome::of(&result));
        result
    }

    /// Return the breaker to Closed, running its close hook unlocked
    pub fn reset(&self) {
        let notices = self.breaker.lock().reset_deferred();
        notices.fire();
    }

    fn enter(&self) -> Result<InFlight<'_, E>, E> {
        let (admission, notices) = self.breaker.lock().admit_deferred();
        notices.fire();
        match admission {
            Admission::Permit(permit) => Ok(InFlight {
                breaker: &self.breaker,
                permit: Some(permit),
            }),
            Admission::Reject(error) => Err(error),
        }
    }
}

/// Holds a permit while the operation runs
///
/// Settling records the outcome; dropping unsettled (cancellation, panic)
/// releases the permit instead.
struct InFlight<'a, E> {
    breaker: &'a Mutex<CircuitBreaker<E>>,
    permit: Option<Permit>,
}

impl<E: Clone> InFlight<'_, E> {
    fn settle(mut self, outcome: Outcome<'_, E>) {
        if let Some(permit) = self.permit.take() {
            let notices = self.breaker.lock().record_deferred(permit, outcome);
            notices.fire();
        }
    }
}

impl<E> Drop for InFlight<'_, E> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.lock().release(permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitState;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum ApiError {
        Unavailable(u32),
        BadRequest,
    }

    fn gate(clock: &ManualClock, failures: u32, successes: u32) -> CallGate<ApiError> {
        let breaker = CircuitBreaker::builder("coffees")
            .failure_threshold(failures)
            .success_threshold(successes)
            .open_duration(Duration::from_millis(60_000))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        CallGate::new(breaker)
    }

    fn state(gate: &CallGate<ApiError>) -> CircuitState {
        gate.breaker().lock().state()
    }

    #[test]
    fn test_call_passes_results_through() {
        let clock = ManualClock::new();
        let gate = gate(&clock, 3, 3);

        assert_eq!(gate.call(|| Ok::<_, ApiError>(42)), Ok(42));
        assert_eq!(
            gate.call(|| Err::<u32, _>(ApiError::BadRequest)),
            Err(ApiError::BadRequest)
        );
        assert_eq!(gate.breaker().lock().failure_count(), 1);
    }

    #[test]
    fn test_rejected_call_does_not_run_operation() {
        let clock = ManualClock::new();
        let gate = gate(&clock, 2, 2);
        let runs = AtomicUsize::new(0);

        for code in [1, 2] {
            let _ = gate.call(|| {
                runs.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::Unavailable(code))
            });
        }
        assert_eq!(state(&gate), CircuitState::Open);

        let result = gate.call(|| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ApiError>(())
        });

        assert_eq!(result, Err(ApiError::Unavailable(2)));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clones_share_one_breaker() {
        let clock = ManualClock::new();
        let a = gate(&clock, 2, 2);
        let b = a.clone();

        let _ = a.call(|| Err::<(), _>(ApiError::Unavailable(1)));
        let _ = b.call(|| Err::<(), _>(ApiError::Unavailable(2)));

        assert_eq!(state(&a), CircuitState::Open);
        assert!(Arc::ptr_eq(a.breaker(), b.breaker()));
    }

    #[test]
    fn test_with_shared_uses_external_breaker() {
        let breaker: SharedBreaker<ApiError> = Arc::new(Mutex::new(
            CircuitBreaker::builder("fibonacci")
                .failure_threshold(1)
                .build()
                .unwrap(),
        ));
        let gate = CallGate::with_shared(Arc::clone(&breaker));

        let _ = gate.call(|| Err::<(), _>(ApiError::Unavailable(7)));

        assert!(breaker.lock().is_open());
        assert_eq!(breaker.lock().last_error(), Some(&ApiError::Unavailable(7)));
    }

    #[test]
    fn test_panicking_probe_frees_slot() {
        let clock = ManualClock::new();
        let gate = gate(&clock, 1, 1);
        let _ = gate.call(|| Err::<(), _>(ApiError::Unavailable(1)));
        clock.advance(Duration::from_millis(60_000));

        let probe_gate = gate.clone();
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _ = probe_gate.call(|| -> Result<(), ApiError> { panic!("handler bug") });
        }));
        assert!(panicked.is_err());
        assert_eq!(state(&gate), CircuitState::HalfOpen);

        assert_eq!(gate.call(|| Ok::<_, ApiError>("recovered")), Ok("recovered"));
        assert_eq!(state(&gate), CircuitState::Closed);
    }

    #[test]
    fn test_hooks_can_inspect_their_own_gate() {
        type Handle = Arc<OnceLock<Weak<Mutex<CircuitBreaker<ApiError>>>>>;

        fn observe(
            handle: &Handle,
            seen: &Arc<Mutex<Vec<CircuitState>>>,
        ) -> impl Fn(&crate::Transition<'_>) + Send + Sync + 'static {
            let (handle, seen) = (Arc::clone(handle), Arc::clone(seen));
            move |_| {
                if let Some(breaker) = handle.get().and_then(Weak::upgrade) {
                    let state = breaker.lock().state();
                    seen.lock().push(state);
                }
            }
        }

        let clock = ManualClock::new();
        let handle: Handle = Arc::new(OnceLock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let breaker = CircuitBreaker::builder("coffees")
            .failure_threshold(1)
            .success_threshold(1)
            .open_duration(Duration::from_secs(1))
            .clock(Arc::new(clock.clone()))
            .on_open(observe(&handle, &seen))
            .on_half_open(observe(&handle, &seen))
            .on_close(observe(&handle, &seen))
            .build()
            .unwrap();
        let gate = CallGate::new(breaker);
        handle.set(Arc::downgrade(gate.breaker())).unwrap();

        let _ = gate.call(|| Err::<(), _>(ApiError::Unavailable(1)));
        clock.advance(Duration::from_secs(1));
        assert_eq!(gate.call(|| Ok::<_, ApiError>(())), Ok(()));
        let _ = gate.call(|| Err::<(), _>(ApiError::Unavailable(2)));
        gate.reset();

        assert_eq!(
            *seen.lock(),
            vec![
                CircuitState::Open,
                CircuitState::HalfOpen,
                CircuitState::Closed,
                CircuitState::Open,
                CircuitState::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_records_async_outcomes() {
        let clock = ManualClock::new();
        let gate = gate(&clock, 3, 3);

        let ok = gate
            .execute(|| async {
                tokio::task::yield_now().await;
                Ok::<_, ApiError>("espresso")
            })
            .await;
        assert_eq!(ok, Ok("espresso"));

        for code in 0..3 {
            let err = gate
                .execute(|| async move { Err::<(), _>(ApiError::Unavailable(code)) })
                .await;
            assert_eq!(err, Err(ApiError::Unavailable(code)));
        }
        assert_eq!(state(&gate), CircuitState::Open);

        let rejected = gate.execute(|| async { Ok::<_, ApiError>("latte") }).await;
        assert_eq!(rejected, Err(ApiError::Unavailable(2)));
    }

    #[tokio::test]
    async fn test_execute_full_recovery_cycle() {
        let clock = ManualClock::new();
        let gate = gate(&clock, 3, 3);

        for _ in 0..3 {
            let _ = gate
                .execute(|| async { Err::<(), _>(ApiError::Unavailable(503)) })
                .await;
        }
        clock.advance(Duration::from_millis(60_001));

        for _ in 0..3 {
            let r = gate.execute(|| async { Ok::<_, ApiError>(()) }).await;
            assert!(r.is_ok());
        }
        assert_eq!(state(&gate), CircuitState::Closed);
        assert_eq!(gate.breaker().lock().success_count(), 0);
    }

    #[tokio::test]
    async fn test_only_one_probe_runs_concurrently() {
        let clock = ManualClock::new();
        let gate = gate(&clock, 1, 1);
        let _ = gate.call(|| Err::<(), _>(ApiError::Unavailable(1)));
        clock.advance(Duration::from_millis(60_000));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_gate = gate.clone();
        let probe = tokio::spawn(async move {
            probe_gate
                .execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, ApiError>("probe")
                })
                .await
        });

        // let the probe take its slot
        while gate.breaker().lock().is_open() {
            tokio::task::yield_now().await;
        }

        let second = gate.execute(|| async { Ok::<_, ApiError>("second") }).await;
        assert_eq!(second, Err(ApiError::Unavailable(1)));

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap(), Ok("probe"));
        assert_eq!(state(&gate), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_probe_is_not_recorded() {
        let clock = ManualClock::new();
        let gate = gate(&clock, 1, 1);
        let _ = gate.call(|| Err::<(), _>(ApiError::Unavailable(1)));
        clock.advance(Duration::from_millis(60_000));

        let never = gate.execute(|| std::future::pending::<Result<(), ApiError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(5), never).await;
        assert!(timed_out.is_err());

        {
            let breaker = gate.breaker().lock();
            assert!(breaker.is_half_open());
            assert_eq!(breaker.success_count(), 0);
            assert_eq!(breaker.failure_count(), 1);
        }

        // the abandoned probe gave its slot back
        let next = gate.execute(|| async { Ok::<_, ApiError>(()) }).await;
        assert!(next.is_ok());
        assert_eq!(state(&gate), CircuitState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_count_exactly() {
        let clock = ManualClock::new();
        let gate = gate(&clock, 1_000, 1);

        let mut handles = Vec::new();
        for i in 0..200 {
            let g = gate.clone();
            handles.push(tokio::spawn(async move {
                g.execute(|| async move { Err::<(), _>(ApiError::Unavailable(i)) })
                    .await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_err());
        }

        assert_eq!(gate.breaker().lock().failure_count(), 200);
        assert_eq!(state(&gate), CircuitState::Closed);
    }
}
