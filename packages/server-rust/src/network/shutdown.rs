//! Lifecycle state and in-flight request accounting for graceful shutdown.
//!
//! State lives in an `ArcSwap` so probes read it without locking. Each
//! accepted inference request holds an [`InFlightGuard`]; the last guard to
//! drop wakes anyone waiting in [`ShutdownController::wait_for_drain`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use infergate_core::GatewayError;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

/// Gateway lifecycle: `Starting -> Ready -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    /// Shutdown requested; in-flight work finishes, new work is refused.
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// `true` while new inference requests may be admitted.
    #[must_use]
    pub fn accepts_requests(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

/// Coordinates shutdown across the HTTP layer and background tasks.
///
/// `trigger_shutdown` flips the state to `Draining`, signals the watch
/// channel, and cancels [`ShutdownController::token`], whose children are
/// handed to request contexts and the health monitor.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    state: ArcSwap<HealthState>,
    in_flight: Arc<InFlight>,
    token: CancellationToken,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            signal,
            state: ArcSwap::from_pointee(HealthState::Starting),
            in_flight: Arc::new(InFlight::default()),
            token: CancellationToken::new(),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    /// Receiver that flips to `true` once shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Root token cancelled when shutdown is triggered.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Moves to `Draining` and notifies every listener. Idempotent.
    pub fn trigger_shutdown(&self) {
        self.state.rcu(|current| match **current {
            HealthState::Stopped => HealthState::Stopped,
            _ => HealthState::Draining,
        });
        let _ = self.signal.send(true);
    }

    /// Cancels every request and background task derived from
    /// [`ShutdownController::token`].
    pub fn cancel_all(&self) {
        self.token.cancel();
    }

    /// Admits a new request, or refuses it with `Unavailable` while
    /// draining or stopped.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` once shutdown has been triggered.
    pub fn admit(&self) -> Result<InFlightGuard, GatewayError> {
        let state = self.health_state();
        if state.accepts_requests() {
            Ok(self.in_flight_guard())
        } else {
            Err(GatewayError::unavailable("gateway is shutting down")
                .with_detail("state", state.as_str())
                .with_retry_hint(true))
        }
    }

    /// Counts a request as in flight until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no request is in flight, for at most `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` when drained; returns `false`
    /// and stays `Draining` on timeout.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.in_flight.drained.notified();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.state.store(Arc::new(HealthState::Stopped));
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}
