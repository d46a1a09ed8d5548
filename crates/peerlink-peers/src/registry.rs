//! In-memory registry of connected peers.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Stable identifier of a peer: the raw, unbracketed address literal it was
/// discovered under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Set of peers the tunnel server currently holds a registration for.
///
/// Owned by a single [`Reconciler`](crate::reconciler::Reconciler); it is the
/// only writer.
#[derive(Debug, Default, Clone)]
pub struct PeerRegistry {
    peers: BTreeSet<PeerId>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a peer is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains(id)
    }

    /// Record a peer as connected.
    pub fn add(&mut self, id: PeerId) {
        debug!(peer_id = %id, "Peer registered");
        self.peers.insert(id);
    }

    /// Forget a peer. Returns whether it was registered.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.peers.remove(id);
        if removed {
            debug!(peer_id = %id, "Peer unregistered");
        } else {
            warn!(peer_id = %id, "Tried to unregister unknown peer");
        }
        removed
    }

    /// Copy of the registered peer ids, in sorted order.
    pub fn snapshot(&self) -> BTreeSet<PeerId> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
