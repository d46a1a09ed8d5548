//! Error types for the peer manager.

/// Errors reported by a [`TunnelServer`](crate::server::TunnelServer).
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Peer rejected: {0}")]
    Rejected(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

/// Errors reported by a [`TokenIssuer`](crate::token::TokenIssuer).
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Failed to read token file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token file {0} is empty")]
    Empty(std::path::PathBuf),

    #[error("Token lifetime of {0}s overflows the expiry timestamp")]
    Lifetime(i64),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Errors loading a membership document.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("Failed to read membership document {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed membership document: {0}")]
    Parse(#[from] serde_json::Error),
}
