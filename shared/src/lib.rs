//! # Shared Module for Edge Fleet Provisioning
//!
//! This crate provides common types, errors, and configuration used across
//! the Device Client and the Registry Service.
//!
//! ## Trust Bootstrap
//!
//! A device ships with a low-privilege claim credential. It uses that
//! credential once to:
//! - obtain its own certificate from a locally generated signing request
//! - register a named identity through a provisioning template
//!
//! after which only the device's own credential is used. The registry side
//! keeps identities and certificates consistent (pre-provisioning cleanup,
//! fleet-wide orphan sweeps).

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use config::*;
pub use constants::*;
pub use error::*;
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
