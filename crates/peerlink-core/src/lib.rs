//! `peerlink` Core Library
//!
//! Shared functionality for `peerlink` components:
//! - Configuration resolution and hierarchy
//! - Tracing/logging initialisation
//! - Optional `OpenTelemetry` metrics for reconciliation passes
//! - Common error types

pub mod config;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod tracing_init;

pub use config::{Config, TokenMode};
pub use error::{Error, Result};
