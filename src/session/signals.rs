//! Operator controls: manual wake, stop and shutdown
//!
//! The [`Operator`] handle is cheap to clone and can be moved to any task
//! (stdin reader, signal handler, tests). The session owns the matching
//! [`Signals`].

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

/// What interrupted a running stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Abandon the current cycle
    Stop,
    /// Abandon the current cycle and exit
    Shutdown,
}

/// Operator request seen while idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Wake,
    Shutdown,
}

/// Handle used to drive a session from outside
#[derive(Debug, Clone)]
pub struct Operator {
    wake_tx: mpsc::Sender<()>,
    stop_tx: Arc<watch::Sender<u64>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Operator {
    /// Request a manual wake
    ///
    /// Returns false if a wake is already pending or the session is gone.
    /// Wakes requested while a cycle runs are dropped, not queued.
    pub fn wake(&self) -> bool {
        self.wake_tx.try_send(()).is_ok()
    }

    /// Abandon the current cycle; ignored while idle
    pub fn stop(&self) {
        self.stop_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Stop the session for good
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

/// Session side of the operator controls
#[derive(Debug)]
pub struct Signals {
    wake_rx: mpsc::Receiver<()>,
    stop_rx: watch::Receiver<u64>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Create a connected operator handle and signal receiver
#[must_use]
pub fn channel() -> (Operator, Signals) {
    let (wake_tx, wake_rx) = mpsc::channel(1);
    let (stop_tx, stop_rx) = watch::channel(0);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    (
        Operator {
            wake_tx,
            stop_tx: Arc::new(stop_tx),
            shutdown_tx: Arc::new(shutdown_tx),
        },
        Signals {
            wake_rx,
            stop_rx,
            shutdown_rx,
        },
    )
}

impl Signals {
    /// Wait for a manual wake or shutdown, whichever comes first
    ///
    /// Shutdown wins when both are pending. Pends forever once every
    /// operator is gone. Cancel safe.
    pub async fn next_control(&mut self) -> Control {
        let Self {
            wake_rx,
            shutdown_rx,
            ..
        } = self;

        tokio::select! {
            biased;
            () = wait_shutdown(shutdown_rx) => Control::Shutdown,
            () = wait_wake(wake_rx) => Control::Wake,
        }
    }

    /// Drop wakes requested while a cycle was running
    pub fn drain_wakes(&mut self) -> usize {
        let mut drained = 0;
        while self.wake_rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    /// Forget stops requested before now
    pub fn clear_stop(&mut self) {
        self.stop_rx.borrow_and_update();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Wait for shutdown
    pub async fn shutdown(&mut self) {
        if self.shutdown_rx.wait_for(|down| *down).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Wait for a stop or shutdown request made after the last
    /// [`clear_stop`](Self::clear_stop)
    ///
    /// Cancel safe.
    pub async fn interrupted(&mut self) -> Interrupt {
        let Self {
            stop_rx,
            shutdown_rx,
            ..
        } = self;

        tokio::select! {
            biased;
            () = wait_shutdown(shutdown_rx) => Interrupt::Shutdown,
            () = wait_stop(stop_rx) => Interrupt::Stop,
        }
    }
}

async fn wait_wake(rx: &mut mpsc::Receiver<()>) {
    if rx.recv().await.is_none() {
        std::future::pending::<()>().await;
    }
}

async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|down| *down).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn wait_stop(rx: &mut watch::Receiver<u64>) {
    if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq};

    use super::*;

    #[test]
    fn test_wake_is_not_queued_twice() {
        let (operator, mut signals) = channel();
        assert!(operator.wake());
        assert!(!operator.wake());
        assert_eq!(signals.drain_wakes(), 1);
        assert!(operator.wake());
    }

    #[test]
    fn test_stop_before_clear_is_forgotten() {
        let (operator, mut signals) = channel();
        operator.stop();
        signals.clear_stop();

        let mut interrupted = task::spawn(signals.interrupted());
        assert_pending!(interrupted.poll());

        operator.stop();
        assert!(interrupted.is_woken());
        assert_ready_eq!(interrupted.poll(), Interrupt::Stop);
    }

    #[test]
    fn test_shutdown_wins_over_stop() {
        let (operator, mut signals) = channel();
        signals.clear_stop();
        operator.stop();
        operator.shutdown();

        let mut interrupted = task::spawn(signals.interrupted());
        assert_ready_eq!(interrupted.poll(), Interrupt::Shutdown);
        assert!(operator.is_shutdown());
    }

    #[test]
    fn test_shutdown_future() {
        let (operator, mut signals) = channel();
        let mut shutdown = task::spawn(signals.shutdown());
        assert_pending!(shutdown.poll());
        operator.shutdown();
        assert_ready!(shutdown.poll());
    }

    #[test]
    fn test_next_control() {
        let (operator, mut signals) = channel();
        {
            let mut control = task::spawn(signals.next_control());
            assert_pending!(control.poll());
            assert!(operator.wake());
            assert_ready_eq!(control.poll(), Control::Wake);
        }

        assert!(operator.wake());
        operator.shutdown();
        let mut control = task::spawn(signals.next_control());
        assert_ready_eq!(control.poll(), Control::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_operator_never_interrupts() {
        let (operator, mut signals) = channel();
        drop(operator);

        let waited = tokio::time::timeout(Duration::from_secs(60), signals.interrupted()).await;
        assert!(waited.is_err());
        assert!(!signals.is_shutdown());
    }
}
