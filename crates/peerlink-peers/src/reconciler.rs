//! Membership reconciliation.
//!
//! A pass takes a full [`MembershipSnapshot`], diffs it against the
//! [`PeerRegistry`] and applies the difference through the [`TunnelServer`]:
//!
//! 1. addresses that are not IP literals are dropped,
//! 2. new peers are connected in snapshot order,
//! 3. peers missing from the snapshot are disconnected.
//!
//! The registry only records a peer once `add_peer` succeeded, so a failed
//! connect is retried by the next pass. A peer is forgotten as soon as
//! `remove_peer` was attempted, whatever its outcome.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::address::{build_url, format_display};
use crate::membership::MembershipSnapshot;
use crate::registry::{PeerId, PeerRegistry};
use crate::server::TunnelServer;
use crate::token::TokenIssuer;

/// A peer to connect, with its URL display address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAdd {
    pub id: PeerId,
    pub display: String,
}

/// Actions a pass would take.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Peers to connect, in snapshot order.
    pub to_add: Vec<PlannedAdd>,
    /// Registered peers absent from the snapshot.
    pub to_remove: Vec<PeerId>,
    /// Addresses that are not IP literals.
    pub skipped: Vec<String>,
    /// Whether the local peer appeared in the snapshot.
    pub self_present: bool,
}

/// Diff `snapshot` against `registry` without side effects.
///
/// Repeated addresses collapse to their first occurrence; `self_id` is never
/// planned for connection.
pub fn plan(
    snapshot: &MembershipSnapshot,
    registry: &PeerRegistry,
    self_id: Option<&PeerId>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut desired: HashSet<&str> = HashSet::new();

    for addr in snapshot.addresses() {
        let Some(display) = format_display(addr) else {
            plan.skipped.push(addr.clone());
            continue;
        };
        if self_id.is_some_and(|id| id.as_str() == addr) {
            plan.self_present = true;
            continue;
        }
        if !desired.insert(addr.as_str()) {
            continue;
        }
        if !registry.contains(addr) {
            plan.to_add.push(PlannedAdd {
                id: PeerId::new(addr.as_str()),
                display,
            });
        }
    }

    plan.to_remove = registry
        .snapshot()
        .into_iter()
        .filter(|id| !desired.contains(id.as_str()))
        .collect();

    plan
}

/// Outcome of one applied pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Peers connected and now registered.
    pub added: Vec<PeerId>,
    /// Peers whose token or connect failed; retried by the next pass.
    pub add_failed: Vec<PeerId>,
    /// Peers disconnected and forgotten.
    pub removed: Vec<PeerId>,
    /// Subset of `removed` whose teardown reported an error.
    pub remove_failed: Vec<PeerId>,
    /// Addresses that are not IP literals.
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    /// No connect or disconnect was attempted.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.add_failed.is_empty()
            && self.removed.is_empty()
    }

    /// Some peers of the snapshot are still not connected.
    pub fn has_pending_adds(&self) -> bool {
        !self.add_failed.is_empty()
    }

    /// Counts for the metrics pipeline.
    #[cfg(feature = "metrics")]
    pub fn pass_counts(&self, registered: usize) -> peerlink_core::metrics::PassCounts {
        let count = |n: usize| u64::try_from(n).unwrap_or(u64::MAX);
        peerlink_core::metrics::PassCounts {
            added: count(self.added.len()),
            add_failures: count(self.add_failed.len()),
            removed: count(self.removed.len()),
            remove_failures: count(self.remove_failed.len()),
            skipped: count(self.skipped.len()),
            registered: count(registered),
        }
    }
}

/// Published view of the peer set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerStatus {
    pub self_id: Option<PeerId>,
    /// Connected peers, sorted.
    pub peers: Vec<PeerId>,
    /// The local peer is listed by the membership source.
    pub ready: bool,
    pub leader: bool,
}

/// Drives a [`TunnelServer`] towards the latest membership snapshot.
///
/// Every mutating operation takes `&mut self`: passes against one registry
/// cannot overlap.
pub struct Reconciler {
    url_format: String,
    self_id: Option<PeerId>,
    registry: PeerRegistry,
    server: Arc<dyn TunnelServer>,
    tokens: Arc<dyn TokenIssuer>,
    ready: bool,
    leader: bool,
    status_tx: watch::Sender<PeerStatus>,
}

impl Reconciler {
    pub fn new(
        url_format: impl Into<String>,
        server: Arc<dyn TunnelServer>,
        tokens: Arc<dyn TokenIssuer>,
    ) -> Self {
        let (status_tx, _) = watch::channel(PeerStatus::default());
        Self {
            url_format: url_format.into(),
            self_id: None,
            registry: PeerRegistry::new(),
            server,
            tokens,
            ready: false,
            leader: false,
            status_tx,
        }
    }

    /// Exclude the local peer from connection and track its readiness.
    #[must_use]
    pub fn with_self_id(mut self, self_id: PeerId) -> Self {
        self.self_id = Some(self_id);
        self.publish();
        self
    }

    pub const fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn self_id(&self) -> Option<&PeerId> {
        self.self_id.as_ref()
    }

    /// Current status.
    pub fn status(&self) -> PeerStatus {
        PeerStatus {
            self_id: self.self_id.clone(),
            peers: self.registry.snapshot().into_iter().collect(),
            ready: self.ready,
            leader: self.leader,
        }
    }

    /// Receive a new [`PeerStatus`] whenever it changes.
    pub fn subscribe(&self) -> watch::Receiver<PeerStatus> {
        self.status_tx.subscribe()
    }

    /// Record whether this process holds leadership.
    pub fn set_leader(&mut self, leader: bool) {
        self.leader = leader;
        self.publish();
    }

    /// Compute the actions a pass over `snapshot` would take.
    pub fn plan(&self, snapshot: &MembershipSnapshot) -> ReconcilePlan {
        plan(snapshot, &self.registry, self.self_id.as_ref())
    }

    /// Run one reconciliation pass.
    #[instrument(skip_all, fields(addresses = snapshot.len()))]
    pub async fn reconcile(&mut self, snapshot: &MembershipSnapshot) -> ReconcileReport {
        let plan = self.plan(snapshot);
        let mut report = ReconcileReport {
            skipped: plan.skipped,
            ..ReconcileReport::default()
        };
        for addr in &report.skipped {
            debug!(address = %addr, "Skipping non-IP membership address");
        }

        for PlannedAdd { id, display } in plan.to_add {
            let token = match self.tokens.issue(&id).await {
                Ok(token) => token,
                Err(e) => {
                    warn!(peer_id = %id, error = %e, "Failed to issue peer token");
                    report.add_failed.push(id);
                    continue;
                }
            };
            let url = build_url(&self.url_format, &display);
            match self.server.add_peer(&url, &id, &token).await {
                Ok(()) => {
                    info!(peer_id = %id, url = %url, "Peer connected");
                    self.registry.add(id.clone());
                    report.added.push(id);
                }
                Err(e) => {
                    warn!(peer_id = %id, url = %url, error = %e, "Failed to connect peer");
                    report.add_failed.push(id);
                }
            }
        }

        for id in plan.to_remove {
            if let Err(e) = self.server.remove_peer(&id).await {
                warn!(peer_id = %id, error = %e, "Peer teardown failed, forgetting it anyway");
                report.remove_failed.push(id.clone());
            } else {
                info!(peer_id = %id, "Peer disconnected");
            }
            self.registry.remove(id.as_str());
            report.removed.push(id);
        }

        self.ready = self.self_id.is_none() || plan.self_present;
        self.publish();

        if !report.is_noop() {
            info!(
                added = report.added.len(),
                add_failed = report.add_failed.len(),
                removed = report.removed.len(),
                peers = self.registry.len(),
                "Reconciliation pass applied"
            );
        }
        report
    }

    /// The tunnel layer lost the connection to `id`.
    ///
    /// Only bookkeeping changes; the next pass reconnects the peer if it is
    /// still a member. Returns whether the peer was registered.
    pub fn peer_gone(&mut self, id: &PeerId) -> bool {
        if !self.registry.contains(id.as_str()) {
            debug!(peer_id = %id, "Disconnect reported for unregistered peer");
            return false;
        }
        info!(peer_id = %id, "Tunnel reported peer gone");
        self.registry.remove(id.as_str());
        self.publish();
        true
    }

    fn publish(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
