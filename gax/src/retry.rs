use std::future::Future;
use std::time::{Duration, Instant};

use tokio::select;

use crate::cancel::CancellationToken;
use crate::status::{Code, Status};

/// Exponential backoff with a ceiling, expressed as an infinite iterator of
/// sleep durations. Doubling ("factor") is left at 1 by default because the
/// runtime's own callers size the ceiling from a deadline rather than
/// wanting unbounded growth.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: u64,
    base: u64,
    factor: u64,
    max_delay: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn from_millis(base: u64) -> ExponentialBackoff {
        ExponentialBackoff {
            current: base,
            base,
            factor: 1u64,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let duration = match self.current.checked_mul(self.factor) {
            Some(millis) => Duration::from_millis(millis),
            None => Duration::from_millis(u64::MAX),
        };

        self.current = self.current.checked_mul(self.base).unwrap_or(u64::MAX);

        match self.max_delay {
            Some(max_delay) if duration > max_delay => Some(max_delay),
            _ => Some(duration),
        }
    }
}

/// Lets a caller's error type be inspected as a transport [`Status`] without
/// the retry loop needing to know its concrete shape.
pub trait TryAs<T> {
    fn try_as(&self) -> Option<&T>;
}

impl TryAs<Status> for Status {
    fn try_as(&self) -> Option<&Status> {
        Some(self)
    }
}

pub trait Predicate<E> {
    fn should_retry(&self, error: &E) -> bool;
}

pub struct CodePredicate {
    codes: Vec<Code>,
}

impl CodePredicate {
    pub fn new(codes: Vec<Code>) -> Self {
        Self { codes }
    }
}

impl<E> Predicate<E> for CodePredicate
where
    E: TryAs<Status>,
{
    fn should_retry(&self, error: &E) -> bool {
        match error.try_as() {
            Some(status) => self.codes.contains(&status.code()),
            None => false,
        }
    }
}

/// The retry policy described in §4.3: exponential backoff bounded by a
/// `deadline`, with the per-attempt ceiling fixed at `deadline / 4`.
#[derive(Clone)]
pub struct RetrySetting {
    pub deadline: Duration,
    pub codes: Vec<Code>,
}

impl RetrySetting {
    pub fn for_deadline(deadline: Duration) -> Self {
        Self {
            deadline,
            codes: Code::TRANSIENT.to_vec(),
        }
    }

    fn max_per_attempt(&self) -> Duration {
        self.deadline / 4
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::from_millis(10).with_max_delay(self.max_per_attempt())
    }

    fn predicate(&self) -> CodePredicate {
        CodePredicate::new(self.codes.clone())
    }
}

impl Default for RetrySetting {
    fn default() -> Self {
        Self::for_deadline(Duration::from_secs(30))
    }
}

/// Retries `a` until it succeeds, a non-transient error is returned, or the
/// cumulative sleep time reaches `retry.deadline` - whichever comes first.
/// The last error is surfaced once the deadline is exhausted. `E` must be
/// constructible from a [`Status`] so that client-side cancellation can be
/// reported with the same error type as a transport failure.
pub async fn invoke<A, R, E>(
    cancel: Option<CancellationToken>,
    retry: Option<RetrySetting>,
    mut a: impl FnMut() -> A,
) -> Result<R, E>
where
    E: TryAs<Status> + From<Status>,
    A: Future<Output = Result<R, E>>,
{
    let fn_loop = async {
        let retry = retry.unwrap_or_default();
        let predicate = retry.predicate();
        let mut backoff = retry.backoff();
        let start = Instant::now();

        loop {
            let result = a().await;
            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !predicate.should_retry(&error) {
                return Err(error);
            }
            if start.elapsed() >= retry.deadline {
                return Err(error);
            }

            let wait = backoff.next().unwrap_or_else(|| retry.max_per_attempt());
            let remaining = retry.deadline.saturating_sub(start.elapsed());
            tokio::time::sleep(wait.min(remaining)).await;
        }
    };

    match cancel {
        Some(cancel) => {
            select! {
                _ = cancel.cancelled() => Err(Status::cancelled("client cancelled").into()),
                result = fn_loop => result,
            }
        }
        None => fn_loop.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct FakeError(Status);

    impl TryAs<Status> for FakeError {
        fn try_as(&self) -> Option<&Status> {
            Some(&self.0)
        }
    }

    impl From<Status> for FakeError {
        fn from(status: Status) -> Self {
            Self(status)
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<&str, FakeError> = invoke(None, Some(RetrySetting::for_deadline(Duration::from_secs(1))), move || {
            let attempts = attempts_clone.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FakeError(Status::new(Code::Unavailable, "try again")))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_transient_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<(), FakeError> = invoke(None, None, move || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(FakeError(Status::new(Code::InvalidArgument, "bad input")))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn surfaces_last_error_once_deadline_exhausted() {
        let retry = RetrySetting::for_deadline(Duration::from_millis(40));

        let result: Result<(), FakeError> = invoke(None, Some(retry), || async {
            Err(FakeError(Status::new(Code::Unavailable, "still down")))
        })
        .await;

        match result {
            Err(FakeError(status)) => assert_eq!(status.code(), Code::Unavailable),
            Ok(_) => panic!("expected an error"),
        }
    }
}
