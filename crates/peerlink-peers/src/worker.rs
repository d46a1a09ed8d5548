//! Dedicated task that serializes reconciliation passes.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::membership::MembershipSnapshot;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::registry::PeerId;

/// Owns a [`Reconciler`] and feeds it snapshots one pass at a time.
///
/// Snapshots arrive through a `watch` channel: a snapshot published while a
/// pass is running replaces any earlier unprocessed one, and the next pass
/// works from the latest.
pub struct ReconcileWorker {
    reconciler: Reconciler,
    resync_interval: Option<Duration>,
    #[cfg(feature = "metrics")]
    metrics: Option<peerlink_core::metrics::PeerMetrics>,
}

impl ReconcileWorker {
    pub const fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            resync_interval: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Re-run the last snapshot on this interval while peers are pending.
    #[must_use]
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }

    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, metrics: peerlink_core::metrics::PeerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawn the worker loop.
    ///
    /// * `snapshots` -- latest membership; `None` until the source has read one.
    /// * `gone` -- peers the tunnel layer reports as disconnected.
    /// * `shutdown` -- stops the loop once it changes or its sender drops.
    ///
    /// The handle yields the reconciler back when the loop ends.
    pub fn spawn(
        self,
        snapshots: watch::Receiver<Option<MembershipSnapshot>>,
        gone: mpsc::Receiver<PeerId>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<Reconciler> {
        tokio::spawn(self.run(snapshots, gone, shutdown))
    }

    async fn run(
        mut self,
        mut snapshots: watch::Receiver<Option<MembershipSnapshot>>,
        mut gone: mpsc::Receiver<PeerId>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Reconciler {
        let mut resync = self.resync_interval.map(|period| {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        let mut last: Option<MembershipSnapshot> = None;
        let mut pending = false;

        let initial = snapshots.borrow_and_update().clone();
        if let Some(snapshot) = initial {
            pending = self.pass(&snapshot).await;
            arm(&mut resync, false, pending);
            last = Some(snapshot);
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        info!("Membership source closed, reconcile worker stopping");
                        break;
                    }
                    let latest = snapshots.borrow_and_update().clone();
                    if let Some(snapshot) = latest {
                        let was_pending = pending;
                        pending = self.pass(&snapshot).await;
                        arm(&mut resync, was_pending, pending);
                        last = Some(snapshot);
                    }
                }
                Some(id) = gone.recv() => {
                    if self.reconciler.peer_gone(&id) {
                        arm(&mut resync, pending, true);
                        pending = true;
                    }
                }
                () = tick(&mut resync), if pending => {
                    if let Some(snapshot) = &last {
                        debug!("Resyncing pending peers");
                        pending = self.pass(snapshot).await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(peers = self.reconciler.registry().len(), "Reconcile worker stopped");
        self.reconciler
    }

    /// Run one pass; returns whether peers remain unconnected.
    async fn pass(&mut self, snapshot: &MembershipSnapshot) -> bool {
        let report = self.reconciler.reconcile(snapshot).await;
        self.record(&report);
        report.has_pending_adds()
    }

    #[cfg(feature = "metrics")]
    fn record(&self, report: &ReconcileReport) {
        if let Some(metrics) = &self.metrics {
            metrics.record_pass(report.pass_counts(self.reconciler.registry().len()));
        }
    }

    #[cfg(not(feature = "metrics"))]
    #[allow(clippy::unused_self)]
    const fn record(&self, _report: &ReconcileReport) {}
}

/// Restart the resync period when peers become pending.
fn arm(timer: &mut Option<Interval>, was_pending: bool, pending: bool) {
    if let Some(timer) = timer.as_mut().filter(|_| pending && !was_pending) {
        timer.reset();
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
