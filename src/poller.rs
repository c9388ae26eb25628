use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Result of one probe cycle. `Pending` carries no payload; it only keeps the
/// loop going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    Pending,
}

/// Terminal result of a bounded wait. Timeout and cancellation are values,
/// not errors, so callers can tell "still working" from "definitively broken".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

/// Invoke `probe` immediately and then every `interval` until it yields
/// `Ready`, the accumulated wait reaches `deadline`, or `cancel` fires.
///
/// Elapsed time accumulates logically (`interval` per cycle), so a probe that
/// never readies runs exactly `deadline / interval` times. A fault raised by
/// the probe propagates immediately and is distinct from `TimedOut`.
pub async fn poll<T, E, F, Fut>(
    mut probe: F,
    interval: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<PollResult<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome<T>, E>>,
{
    let mut elapsed = Duration::ZERO;
    loop {
        if cancel.is_cancelled() {
            return Ok(PollResult::Cancelled);
        }
        if elapsed >= deadline {
            return Ok(PollResult::TimedOut);
        }
        if let PollOutcome::Ready(value) = probe().await? {
            return Ok(PollResult::Completed(value));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(PollResult::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
        elapsed += interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn pending_probe_times_out_after_the_expected_cycle_count() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<PollResult<()>, Infallible> = poll(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(PollOutcome::Pending)
                }
            },
            Duration::from_millis(1),
            Duration::from_millis(30),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result.unwrap(), PollResult::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 30);
    }

    #[tokio::test]
    async fn ready_on_the_third_probe_returns_without_further_waits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<PollResult<u32>, Infallible> = poll(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                        Ok(PollOutcome::Ready(7))
                    } else {
                        Ok(PollOutcome::Pending)
                    }
                }
            },
            Duration::from_millis(1),
            Duration::from_millis(30),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result.unwrap(), PollResult::Completed(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn probe_faults_propagate_instead_of_becoming_timeouts() {
        let result: Result<PollResult<()>, &str> = poll(
            || async { Err("probe exploded") },
            Duration::from_millis(1),
            Duration::from_millis(30),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result.unwrap_err(), "probe exploded");
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_the_first_probe() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<PollResult<()>, Infallible> = poll(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(PollOutcome::Pending)
                }
            },
            Duration::from_millis(1),
            Duration::from_millis(30),
            &cancel,
        )
        .await;
        assert_eq!(result.unwrap(), PollResult::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
