use crate::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How long a query keeps re-reading the store for an absent record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Give up once the duration has elapsed. Zero reads exactly once.
    Timeout(Duration),
    Forever,
}

impl Wait {
    pub fn millis(ms: u64) -> Self {
        Wait::Timeout(Duration::from_millis(ms))
    }

    pub fn none() -> Self {
        Wait::Timeout(Duration::ZERO)
    }

    /// What is left of this wait after the time spent since `started`
    pub fn remaining(self, started: Instant) -> Self {
        match self {
            Wait::Timeout(duration) => Wait::Timeout(duration.saturating_sub(started.elapsed())),
            Wait::Forever => Wait::Forever,
        }
    }
}

impl Default for Wait {
    fn default() -> Self {
        Wait::none()
    }
}

/// Run `probe` every `interval` until it yields a value or `wait` runs out
pub(crate) async fn poll<T, F, Fut>(wait: Wait, interval: Duration, mut probe: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = match wait {
        Wait::Timeout(duration) => Some(Instant::now() + duration),
        Wait::Forever => None,
    };

    loop {
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }

        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        tokio::time::sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_zero_wait_probes_once() {
        let calls = AtomicUsize::new(0);
        let found: Option<()> = poll(Wait::none(), Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .await
        .unwrap();

        assert!(found.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_until_found() {
        let calls = AtomicUsize::new(0);
        let found = poll(Wait::Forever, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok((n >= 3).then_some(n))
        })
        .await
        .unwrap();

        assert_eq!(found, Some(3));
    }

    #[tokio::test]
    async fn test_remaining_shrinks_with_elapsed_time() {
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(30)).await;

        match Wait::millis(50).remaining(started) {
            Wait::Timeout(left) => assert!(left <= Duration::from_millis(20)),
            Wait::Forever => panic!("expected a bounded wait"),
        }
        assert_eq!(Wait::millis(10).remaining(started), Wait::none());
        assert_eq!(Wait::Forever.remaining(started), Wait::Forever);
    }

    #[tokio::test]
    async fn test_timeout_returns_absent() {
        let started = Instant::now();
        let found: Option<()> = poll(Wait::millis(20), Duration::from_millis(5), || async { Ok(None) })
            .await
            .unwrap();

        assert!(found.is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
