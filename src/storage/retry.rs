use std::{future::Future, time::Duration};

use tracing::warn;

use super::StoreError;

/// Fixed-backoff retry for store operations that fail only because the store
/// isn't reachable yet. Any other failure is returned immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(StoreError::Unavailable(e))
                    if self.max_attempts.map_or(true, |max| attempt < max) =>
                {
                    warn!(
                        "Couldn't reach {what} (attempt {attempt}): {e}. Retrying in {:?}",
                        self.interval
                    );
                    tokio::time::sleep(self.interval).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn unavailable() -> StoreError {
        StoreError::Unavailable(tokio_rusqlite::Error::ConnectionClosed)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_reachable() {
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result = RetryPolicy::default()
            .run("store", move || async move {
                if calls.fetch_add(1, Ordering::Relaxed) < 3 {
                    Err(unavailable())
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 4);
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_propagate() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run("store", move || async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(StoreError::Corrupt("bad row".to_owned()))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_limit() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy {
            interval: Duration::from_millis(10),
            max_attempts: Some(2),
        };
        let result: Result<(), _> = policy
            .run("store", move || async move {
                calls.fetch_add(1, Ordering::Relaxed);
                Err(unavailable())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
