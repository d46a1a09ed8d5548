//! Tunnel server contract driven by the reconciler.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::TunnelError;
use crate::registry::PeerId;

/// The tunnel layer that owns actual connection establishment and teardown.
///
/// Both calls are awaited before the reconciler updates its registry.
#[async_trait]
pub trait TunnelServer: Send + Sync {
    /// Start maintaining a connection to `url`, identified by `id` and
    /// authenticated with `token`. An error means "not connected yet".
    async fn add_peer(&self, url: &str, id: &PeerId, token: &str) -> Result<(), TunnelError>;

    /// Tear down the connection identified by `id`. Best-effort.
    async fn remove_peer(&self, id: &PeerId) -> Result<(), TunnelError>;
}

/// Tunnel server that only logs the actions it is asked to take.
///
/// Used by `peerlink run` when no transport is attached, so operators can
/// watch how membership changes would be applied.
#[derive(Debug, Default)]
pub struct DryRunTunnelServer {
    peers: Mutex<BTreeMap<PeerId, String>>,
}

impl DryRunTunnelServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peers currently "connected", with their URLs.
    pub async fn peers(&self) -> BTreeMap<PeerId, String> {
        self.peers.lock().await.clone()
    }
}

#[async_trait]
impl TunnelServer for DryRunTunnelServer {
    async fn add_peer(&self, url: &str, id: &PeerId, _token: &str) -> Result<(), TunnelError> {
        info!(peer_id = %id, url, "Would connect to peer");
        self.peers.lock().await.insert(id.clone(), url.to_string());
        Ok(())
    }

    async fn remove_peer(&self, id: &PeerId) -> Result<(), TunnelError> {
        if self.peers.lock().await.remove(id).is_none() {
            return Err(TunnelError::UnknownPeer(id.to_string()));
        }
        info!(peer_id = %id, "Would disconnect from peer");
        Ok(())
    }
}
