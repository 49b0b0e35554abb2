use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// Bounded attempt budget for one polling stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Cooperative cancellation shared by every poll loop and blocking call of a run.
///
/// Fires when [`Cancellation::cancel`] is called or when the optional deadline passes.
/// Sleeps and SDK calls driven through it return early once it fires.
#[derive(Clone, Debug)]
pub struct Cancellation {
    token: CancellationToken,
    deadline: Option<Instant>,
    runtime: Arc<Runtime>,
}

impl Cancellation {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            runtime,
        }
    }

    pub fn with_deadline(runtime: Arc<Runtime>, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::new(runtime)
        }
    }

    pub fn with_timeout(runtime: Arc<Runtime>, timeout: Duration) -> Self {
        Self::with_deadline(runtime, Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Drives `future` to completion on the shared runtime unless the run is cancelled
    /// first, in which case `None` is returned and the future is dropped.
    pub fn block_on<F: Future>(&self, future: F) -> Option<F::Output> {
        self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = self.fired() => None,
                output = future => Some(output),
            }
        })
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` when cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.block_on(async move { tokio::time::sleep(duration).await }).is_some()
    }

    async fn fired(&self) {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline.into()) => {}
            },
            None => self.token.cancelled().await,
        }
    }
}

/// Why a bounded poll loop stopped without producing a value.
#[derive(Debug)]
pub enum WaitError<E> {
    /// The check never became ready within the attempt budget.
    Exhausted { attempts: u32 },
    /// The run was cancelled or its deadline passed.
    Cancelled,
    /// The check itself failed; no further attempts were made.
    Failed(E),
}

/// Runs `check` until it returns `Ok(Some(_))`, sleeping `policy.interval` between attempts.
///
/// The check is called at most `policy.attempts` times. `Ok(None)` means "not yet" and is
/// retried; `Err(_)` aborts immediately, and is reported as a cancellation when the run was
/// cancelled while the check was in flight.
pub fn poll_until<T, E, F>(
    stage: &str,
    policy: &RetryPolicy,
    cancel: &Cancellation,
    mut check: F,
) -> Result<T, WaitError<E>>
where
    F: FnMut(u32) -> Result<Option<T>, E>,
{
    let started = Instant::now();

    for attempt in 1..=policy.attempts {
        if cancel.is_cancelled() {
            warn!("[{stage}] cancelled before attempt {attempt}");
            return Err(WaitError::Cancelled);
        }

        debug!("[{stage}] attempt {attempt}/{}", policy.attempts);
        match check(attempt) {
            Ok(Some(value)) => {
                debug!(
                    "[{stage}] ready after {}ms (attempt {attempt})",
                    started.elapsed().as_millis()
                );
                return Ok(value);
            }
            Ok(None) => {}
            Err(_) if cancel.is_cancelled() => {
                warn!("[{stage}] cancelled during attempt {attempt}");
                return Err(WaitError::Cancelled);
            }
            Err(err) => return Err(WaitError::Failed(err)),
        }

        if attempt == policy.attempts {
            break;
        }

        info!(
            "[{stage}] not ready yet, check {attempt}/{}; waiting {}ms",
            policy.attempts,
            policy.interval.as_millis()
        );
        if !cancel.sleep(policy.interval) {
            warn!("[{stage}] cancelled while waiting");
            return Err(WaitError::Cancelled);
        }
    }

    warn!(
        "[{stage}] gave up after {} attempts ({}ms)",
        policy.attempts,
        started.elapsed().as_millis()
    );
    Err(WaitError::Exhausted {
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::thread;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    fn cancellation() -> Cancellation {
        Cancellation::new(crate::aws::build_runtime().unwrap())
    }

    #[test]
    fn succeeds_immediately() {
        let calls = Cell::new(0);
        let result: Result<u32, WaitError<()>> =
            poll_until("test", &fast(5), &cancellation(), |attempt| {
                calls.set(calls.get() + 1);
                Ok(Some(attempt))
            });
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retries_until_ready() {
        let result: Result<u32, WaitError<()>> =
            poll_until("test", &fast(5), &cancellation(), |attempt| {
                Ok((attempt >= 3).then_some(attempt))
            });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn exhausts_after_exact_attempt_count() {
        let calls = Cell::new(0);
        let result: Result<(), WaitError<()>> =
            poll_until("test", &fast(4), &cancellation(), |_| {
                calls.set(calls.get() + 1);
                Ok(None)
            });
        assert!(matches!(result, Err(WaitError::Exhausted { attempts: 4 })));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn fails_immediately_on_error() {
        let calls = Cell::new(0);
        let result: Result<(), WaitError<&str>> =
            poll_until("test", &fast(4), &cancellation(), |_| {
                calls.set(calls.get() + 1);
                Err("boom")
            });
        assert!(matches!(result, Err(WaitError::Failed("boom"))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cancelled_token_stops_before_first_attempt() {
        let cancel = cancellation();
        cancel.cancel();
        let result: Result<(), WaitError<()>> =
            poll_until("test", &fast(4), &cancel, |_| panic!("must not be called"));
        assert!(matches!(result, Err(WaitError::Cancelled)));
    }

    #[test]
    fn failure_after_cancel_reports_cancellation() {
        let cancel = cancellation();
        let result: Result<(), WaitError<&str>> = poll_until("test", &fast(4), &cancel, |_| {
            cancel.cancel();
            Err("call interrupted")
        });
        assert!(matches!(result, Err(WaitError::Cancelled)));
    }

    #[test]
    fn cancel_wakes_a_sleeping_poll() {
        let cancel = cancellation();
        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        let result: Result<(), WaitError<()>> = poll_until("test", &policy, &cancel, |_| Ok(None));
        handle.join().unwrap();

        assert!(matches!(result, Err(WaitError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn deadline_cuts_sleep_short() {
        let runtime = crate::aws::build_runtime().unwrap();
        let cancel = Cancellation::with_timeout(runtime, Duration::from_millis(10));
        let started = Instant::now();
        assert!(!cancel.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn deadline_abandons_a_hung_call() {
        let runtime = crate::aws::build_runtime().unwrap();
        let cancel = Cancellation::with_timeout(runtime, Duration::from_millis(10));
        let started = Instant::now();
        assert_eq!(cancel.block_on(std::future::pending::<()>()), None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn block_on_returns_the_output() {
        assert_eq!(cancellation().block_on(async { 7 }), Some(7));
    }
}
