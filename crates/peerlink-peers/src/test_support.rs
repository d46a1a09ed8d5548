//! Recording fakes for reconciler tests.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;

use crate::error::{TokenError, TunnelError};
use crate::registry::PeerId;
use crate::server::TunnelServer;
use crate::token::TokenIssuer;

pub const TEST_URL_FORMAT: &str = "ws://%s/v3/connect";
pub const TEST_TOKEN: &str = "test-token";

/// A call observed by [`RecordingTunnelServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Add { url: String, id: String, token: String },
    Remove { id: String },
}

/// Tunnel server that records every call in order and fails on request.
#[derive(Default)]
pub struct RecordingTunnelServer {
    calls: Mutex<Vec<Call>>,
    failing_adds: Mutex<HashSet<String>>,
    failing_removes: Mutex<HashSet<String>>,
}

#[allow(clippy::unwrap_used)]
impl RecordingTunnelServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_add(&self, id: &str) {
        self.failing_adds.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_remove(&self, id: &str) {
        self.failing_removes.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self) {
        self.failing_adds.lock().unwrap().clear();
        self.failing_removes.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Drain the recorded calls.
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// URLs of recorded add calls, in order.
    pub fn added_urls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Add { url, .. } => Some(url),
                Call::Remove { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
#[allow(clippy::unwrap_used)]
impl TunnelServer for RecordingTunnelServer {
    async fn add_peer(&self, url: &str, id: &PeerId, token: &str) -> Result<(), TunnelError> {
        self.calls.lock().unwrap().push(Call::Add {
            url: url.to_string(),
            id: id.to_string(),
            token: token.to_string(),
        });
        if self.failing_adds.lock().unwrap().contains(id.as_str()) {
            return Err(TunnelError::Connection(format!("dial {url} refused")));
        }
        Ok(())
    }

    async fn remove_peer(&self, id: &PeerId) -> Result<(), TunnelError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Remove { id: id.to_string() });
        if self.failing_removes.lock().unwrap().contains(id.as_str()) {
            return Err(TunnelError::UnknownPeer(id.to_string()));
        }
        Ok(())
    }
}

/// Token issuer that refuses the listed peers and returns [`TEST_TOKEN`]
/// otherwise.
#[derive(Default)]
pub struct FlakyTokenIssuer {
    refused: HashSet<String>,
}

impl FlakyTokenIssuer {
    pub fn refusing(ids: &[&str]) -> Self {
        Self {
            refused: ids.iter().map(ToString::to_string).collect(),
        }
    }
}

#[async_trait]
impl TokenIssuer for FlakyTokenIssuer {
    async fn issue(&self, id: &PeerId) -> Result<String, TokenError> {
        if self.refused.contains(id.as_str()) {
            return Err(TokenError::Jwt(ErrorKind::InvalidToken.into()));
        }
        Ok(TEST_TOKEN.to_string())
    }
}
