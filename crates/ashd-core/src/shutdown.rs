//! Server-wide shutdown broadcast.
//!
//! The one resource shared across all connection tasks. Triggering is
//! one-shot in effect but safe to repeat from any task; every waiter wakes
//! on the first trigger.

use std::sync::Arc;

use tokio::sync::watch;

/// Broadcast cancellation signal shared by the listener and all sessions.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Trigger shutdown. Idempotent; callable from any task.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is triggered. Returns immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_wakes_all_waiters() {
        let signal = ShutdownSignal::new();
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let s = signal.clone();
            waiters.push(tokio::spawn(async move { s.wait().await }));
        }

        signal.trigger();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn repeated_trigger_is_safe() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
        // A late waiter returns immediately.
        signal.wait().await;
    }
}
