//! RUNNING → SHUTTING_DOWN → STOPPED controller: the in-flight
//! wait-group ingress uses to know when it is safe to close destination
//! queues, plus the connection-recycling tick.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const STOPPED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    ShuttingDown,
    Stopped,
}

impl From<u8> for State {
    fn from(raw: u8) -> Self {
        match raw {
            RUNNING => State::Running,
            SHUTTING_DOWN => State::ShuttingDown,
            _ => State::Stopped,
        }
    }
}

/// Shared shutdown state plus the in-flight request wait-group.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    in_flight: AtomicUsize,
    drained: Notify,
    token: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(RUNNING),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            token: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> State {
        State::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state() != State::Running
    }

    /// RUNNING -> SHUTTING_DOWN. Idempotent.
    pub fn begin_shutdown(&self) {
        self.state.store(SHUTTING_DOWN, Ordering::Release);
        self.token.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// RAII guard incrementing the in-flight counter for the lifetime of one
    /// `/drain` request.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            lifecycle: Arc::clone(self),
        }
    }

    /// Wait until the in-flight counter reaches zero. Callers should only
    /// call this after `begin_shutdown`.
    pub async fn wait_drained(&self) {
        loop {
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            self.drained.notified().await;
        }
    }

    pub fn mark_stopped(&self) {
        self.state.store(STOPPED, Ordering::Release);
    }
}

pub struct InFlightGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.lifecycle.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.lifecycle.drained.notify_waiters();
        }
    }
}

/// Emits one token every `interval` on a buffered channel of size 1; the
/// ingress handler drains it to stamp a single subsequent response with
/// `Connection: close`. Stops once the lifecycle leaves RUNNING.
pub fn spawn_recycler(
    lifecycle: Arc<Lifecycle>,
    interval: Duration,
) -> (mpsc::Receiver<()>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let token = lifecycle.cancellation();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    let _ = tx.try_send(());
                }
            }
        }
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_flight_guard_releases_on_drop() {
        let lifecycle = Lifecycle::new();
        {
            let _guard = lifecycle.enter();
            assert_eq!(lifecycle.in_flight.load(Ordering::Acquire), 1);
        }
        lifecycle.wait_drained().await;
        assert_eq!(lifecycle.in_flight.load(Ordering::Acquire), 0);
    }

    #[test]
    fn begin_shutdown_transitions_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), State::Running);
        lifecycle.begin_shutdown();
        assert_eq!(lifecycle.state(), State::ShuttingDown);
        assert!(lifecycle.is_shutting_down());
        lifecycle.mark_stopped();
        assert_eq!(lifecycle.state(), State::Stopped);
    }
}
