//! Async condition polling
//!
//! Provides `eventually` for waiting on conditions that become true over
//! time, such as a service reaching readiness or a log line appearing.
//!
//! # Example
//!
//! ```ignore
//! use hetki::eventually;
//! use std::time::Duration;
//!
//! eventually(|| async { service.is_running() })
//!     .timeout(Duration::from_secs(60))
//!     .interval(Duration::from_millis(500))
//!     .await_condition()
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Error type for condition polling
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("condition not met after {attempts} attempts over {elapsed:?}")]
    TimedOut { attempts: u32, elapsed: Duration },
}

/// Builder for eventually checks
pub struct Eventually<F, Fut>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    condition: F,
    timeout: Duration,
    interval: Duration,
}

/// Create an eventually check that retries until the condition is true
///
/// Default timeout: 30 seconds
/// Default interval: 250ms
pub fn eventually<F, Fut>(condition: F) -> Eventually<F, Fut>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    Eventually {
        condition,
        timeout: Duration::from_secs(30),
        interval: Duration::from_millis(250),
    }
}

impl<F, Fut> Eventually<F, Fut>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    /// Set the timeout duration
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the polling interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the check, retrying until success or timeout
    pub async fn await_condition(self) -> Result<(), PollError> {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            if (self.condition)().await {
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(PollError::TimedOut { attempts, elapsed });
            }

            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_eventually_succeeds_immediately() {
        let result = eventually(|| async { true })
            .timeout(Duration::from_millis(100))
            .await_condition()
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_eventually_succeeds_after_retries() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = eventually(move || {
            let c = counter_clone.clone();
            async move {
                let count = c.fetch_add(1, Ordering::SeqCst);
                count >= 3 // Succeed on 4th attempt
            }
        })
        .timeout(Duration::from_secs(1))
        .interval(Duration::from_millis(10))
        .await_condition()
        .await;

        assert!(result.is_ok());
        assert!(counter.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn test_eventually_times_out() {
        let result = eventually(|| async { false })
            .timeout(Duration::from_millis(100))
            .interval(Duration::from_millis(10))
            .await_condition()
            .await;

        match result.unwrap_err() {
            PollError::TimedOut { attempts, .. } => assert!(attempts > 1),
        }
    }

    #[tokio::test]
    async fn test_eventually_defaults() {
        let ev = eventually(|| async { true });
        assert_eq!(ev.timeout, Duration::from_secs(30));
        assert_eq!(ev.interval, Duration::from_millis(250));
    }
}
