//! Health monitor: runs registered checkers concurrently on an interval and
//! publishes an atomically swapped snapshot of their results.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{HealthCheckResult, HealthChecker, HealthStatus};

type Snapshot = BTreeMap<String, HealthCheckResult>;

/// Deadline for one check when none is configured.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the checker set and the latest results.
///
/// Readers call [`HealthMonitor::results`] and never block a sweep in
/// progress: each sweep builds a fresh snapshot and swaps it in whole.
pub struct HealthMonitor {
    interval: Duration,
    check_timeout: Duration,
    checkers: Mutex<Vec<Arc<dyn HealthChecker>>>,
    results: ArcSwap<Snapshot>,
    running: Mutex<Option<Running>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            checkers: Mutex::new(Vec::new()),
            results: ArcSwap::from_pointee(BTreeMap::new()),
            running: Mutex::new(None),
        }
    }

    /// Sets the deadline after which a check counts as unhealthy.
    #[must_use]
    pub fn with_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn check_timeout(&self) -> Duration {
        self.check_timeout
    }

    /// Adds a checker, replacing any existing checker with the same name.
    pub fn register(&self, checker: Arc<dyn HealthChecker>) {
        let mut checkers = self.checkers.lock();
        checkers.retain(|c| c.name() != checker.name());
        debug!(checker = checker.name(), "health checker registered");
        checkers.push(checker);
    }

    /// Removes the named checker and its last result. Returns `false` if no
    /// checker had that name.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = {
            let mut checkers = self.checkers.lock();
            let before = checkers.len();
            checkers.retain(|c| c.name() != name);
            checkers.len() != before
        };
        if removed {
            self.results.rcu(|current| {
                let mut next = Snapshot::clone(current);
                next.remove(name);
                next
            });
        }
        removed
    }

    #[must_use]
    pub fn checker_names(&self) -> Vec<String> {
        self.checkers.lock().iter().map(|c| c.name().to_string()).collect()
    }

    /// Runs every checker concurrently, publishes the new snapshot, and
    /// returns it.
    ///
    /// A checker that misses the check timeout is recorded as unhealthy and
    /// its cancellation token fires, so one stalled probe never holds up
    /// the sweep.
    pub async fn check_all(&self) -> Arc<Snapshot> {
        self.sweep(&CancellationToken::new()).await
    }

    async fn sweep(&self, cancel: &CancellationToken) -> Arc<Snapshot> {
        let checkers: Vec<Arc<dyn HealthChecker>> = self.checkers.lock().clone();
        let check_timeout = self.check_timeout;

        let results = join_all(checkers.iter().map(|checker| async move {
            let start = Instant::now();
            let token = cancel.child_token();
            let mut result =
                match tokio::time::timeout(check_timeout, checker.check(&token)).await {
                    Ok(result) => result,
                    Err(_) => {
                        token.cancel();
                        let timeout_ms = u64::try_from(check_timeout.as_millis()).unwrap_or(u64::MAX);
                        HealthCheckResult::unhealthy(format!("check timed out after {timeout_ms}ms"))
                            .with_detail("timeout_ms", timeout_ms)
                    }
                };
            if result.duration.is_zero() {
                result.duration = start.elapsed();
            }
            (checker.name().to_string(), result)
        }))
        .await;

        for (name, result) in &results {
            if result.status != HealthStatus::Healthy {
                warn!(checker = %name, status = result.status.as_str(), message = %result.message, "health check not healthy");
            }
        }

        let snapshot: Arc<Snapshot> = Arc::new(results.into_iter().collect());
        self.results.store(Arc::clone(&snapshot));
        snapshot
    }

    /// Latest published results.
    #[must_use]
    pub fn results(&self) -> Arc<Snapshot> {
        self.results.load_full()
    }

    /// `Healthy` only if every result is healthy, `Unknown` before the first
    /// sweep, `Unhealthy` otherwise.
    #[must_use]
    pub fn overall_status(&self) -> HealthStatus {
        let results = self.results.load();
        if results.is_empty() {
            return HealthStatus::Unknown;
        }
        if results.values().all(|r| r.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Starts the background sweep: one immediate sweep, then one per
    /// interval. Idempotent while running. The task stops on [`stop`] or
    /// when `parent` is cancelled.
    ///
    /// [`stop`]: HealthMonitor::stop
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let cancel = parent.child_token();
        let monitor = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            () = token.cancelled() => break,
                            _ = monitor.sweep(&token) => {}
                        }
                    }
                }
            }
            debug!("health monitor loop exited");
        });

        let interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        info!(interval_ms, "health monitor started");
        *running = Some(Running { cancel, handle });
    }

    /// Stops the background sweep and waits for the task to exit.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            let _ = handle.await;
            info!("health monitor stopped");
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("checkers", &self.checker_names())
            .finish_non_exhaustive()
    }
}
