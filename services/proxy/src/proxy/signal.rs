//! One-shot cooperative stop signal.

use std::sync::Arc;

use tokio::sync::watch;

/// A stop flag that can be set once and observed by many tasks.
///
/// Setting it more than once is harmless; only the first call reports
/// that it changed anything.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag. Returns `true` only for the call that set it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set (immediately if it already is).
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // The sender lives as long as `self`, so this cannot fail.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn trigger_is_idempotent() {
        let signal = StopSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let signal = StopSignal::new();
        let other = signal.clone();
        other.trigger();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn already_triggered_resolves_immediately() {
        let signal = StopSignal::new();
        signal.trigger();
        tokio::time::timeout(Duration::from_millis(100), signal.triggered())
            .await
            .expect("should resolve immediately");
    }

    #[tokio::test]
    async fn wakes_all_waiters() {
        let signal = StopSignal::new();
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let signal = signal.clone();
            waiters.push(tokio::spawn(async move { signal.triggered().await }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.trigger();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .unwrap();
        }
    }
}
