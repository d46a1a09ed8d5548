//! Shared fixtures for peerlink integration tests.

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;

use peerlink_peers::{PeerId, TunnelError, TunnelServer};

pub const URL_FORMAT: &str = "ws://%s/v3/connect";

/// Connection currently held by [`FakeTunnel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub url: String,
    pub id: String,
    pub token: String,
}

/// In-memory tunnel server keeping the connections it was asked to open.
#[derive(Default)]
pub struct FakeTunnel {
    connections: Mutex<Vec<Connection>>,
    removed: Mutex<Vec<String>>,
}

#[allow(clippy::unwrap_used)]
impl FakeTunnel {
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
#[allow(clippy::unwrap_used)]
impl TunnelServer for FakeTunnel {
    async fn add_peer(&self, url: &str, id: &PeerId, token: &str) -> Result<(), TunnelError> {
        let mut connections = self.connections.lock().unwrap();
        if connections.iter().any(|c| c.id == id.as_str()) {
            return Err(TunnelError::Rejected(format!("{id} already connected")));
        }
        connections.push(Connection {
            url: url.to_string(),
            id: id.to_string(),
            token: token.to_string(),
        });
        Ok(())
    }

    async fn remove_peer(&self, id: &PeerId) -> Result<(), TunnelError> {
        self.removed.lock().unwrap().push(id.to_string());
        let mut connections = self.connections.lock().unwrap();
        let before = connections.len();
        connections.retain(|c| c.id != id.as_str());
        if connections.len() == before {
            return Err(TunnelError::UnknownPeer(id.to_string()));
        }
        Ok(())
    }
}
