//! Cooperative cancellation for the orchestrator's suspension points.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Owner side: flips every [`CancelToken`] cloned from the pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Checked between loop iterations and raced against every sleep.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    /// A token nobody can cancel.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancelled. Pending forever if the handle was dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(Error::Cancelled),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_completes_when_not_cancelled() {
        let token = CancelToken::never();
        token.sleep(Duration::from_millis(1)).await.unwrap();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_interrupts_sleep() {
        let (handle, token) = cancel_pair();
        let sleeper = tokio::spawn({
            let token = token.clone();
            async move { token.sleep(Duration::from_secs(3600)).await }
        });
        handle.cancel();
        assert!(matches!(sleeper.await.unwrap(), Err(Error::Cancelled)));
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}
