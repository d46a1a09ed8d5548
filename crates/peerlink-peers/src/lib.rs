//! peerlink Peer Manager Library
//!
//! Keeps a tunnel server connected to every member of a service:
//! - Address literal parsing and connection URL building
//! - Registry of connected peers
//! - Membership reconciliation against a `TunnelServer`
//! - Peer token issuance (shared token or per-peer JWT)
//! - Membership documents, file polling and the reconcile worker

pub mod address;
pub mod error;
pub mod membership;
pub mod reconciler;
pub mod registry;
pub mod server;
pub mod source;
pub mod token;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use error::{MembershipError, TokenError, TunnelError};
pub use membership::{MembershipSnapshot, ServiceFilter};
pub use reconciler::{PeerStatus, ReconcilePlan, ReconcileReport, Reconciler};
pub use registry::{PeerId, PeerRegistry};
pub use server::{DryRunTunnelServer, TunnelServer};
pub use source::FileMembershipSource;
pub use token::{JwtTokenIssuer, StaticTokenIssuer, TokenIssuer};
pub use worker::ReconcileWorker;
