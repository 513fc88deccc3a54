use std::sync::Arc;
use tokio::sync::watch;

/// Requests a graceful stop of the trading loop
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observed by the trading loop between cycles
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl ShutdownSignal {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested; never resolves if every handle is dropped first
    pub async fn requested(&mut self) {
        let closed = self.rx.wait_for(|stop| *stop).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_is_observed() {
        let (handle, mut signal) = shutdown_channel();
        assert!(!signal.is_requested());

        handle.trigger();
        assert!(signal.is_requested());
        tokio::time::timeout(Duration::from_secs(1), signal.requested())
            .await
            .expect("requested() should resolve after trigger");
    }

    #[tokio::test]
    async fn test_dropped_handle_never_resolves() {
        let (handle, mut signal) = shutdown_channel();
        drop(handle);

        let result = tokio::time::timeout(Duration::from_millis(50), signal.requested()).await;
        assert!(result.is_err());
        assert!(!signal.is_requested());
    }
}
