//! Set-once readiness signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::HarnessError;

/// A monotonic flag a worker raises once its startup has completed.
///
/// One writer, many readers. Once set it is never cleared, and waiting on
/// an already-set signal returns immediately.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    name: String,
    tx: Arc<watch::Sender<bool>>,
}

impl ReadySignal {
    /// A fresh, unset signal.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            name: name.into(),
            tx: Arc::new(tx),
        }
    }

    /// Raises the signal. Later calls do nothing.
    pub fn set(&self) {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
    }

    /// Returns `true` once the signal has been raised.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspends until the signal is raised.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ReadyTimeout`] if `timeout` elapses first.
    pub async fn wait(&self, timeout: Duration) -> Result<(), HarnessError> {
        let mut rx = self.tx.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await;
        match result {
            Ok(Ok(_)) => Ok(()),
            // The sender lives as long as `self`, so the channel cannot close here.
            Ok(Err(_)) | Err(_) => Err(HarnessError::ReadyTimeout {
                name: self.name.clone(),
                timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unset_signal_times_out() {
        let signal = ReadySignal::new("w");
        let started = tokio::time::Instant::now();
        let result = signal.wait(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(HarnessError::ReadyTimeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn set_wakes_waiters() {
        let signal = ReadySignal::new("w");
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait(Duration::from_secs(2)).await });
        tokio::task::yield_now().await;
        signal.set();
        assert!(matches!(handle.await, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn readiness_is_monotonic_and_idempotent() {
        let signal = ReadySignal::new("w");
        signal.set();
        signal.set();
        assert!(signal.is_set());
        tokio_test::assert_ok!(signal.wait(Duration::ZERO).await);
        tokio_test::assert_ok!(signal.wait(Duration::ZERO).await);
        assert!(signal.is_set());
    }
}
