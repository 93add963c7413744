//! Hotwire – a live-codable component runtime
//!
//! This crate provides:
//! - Addressable component trees whose units talk through correlated calls
//! - Hot-swapping of a unit's behavior while compatible state carries over
//! - A logical clock with scheduled delivery and request timeouts
//! - A suspendable script interpreter for driving a running tree
//! - Hand-off of a root onto a driver thread for cross-thread use

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Script interpreter and the `core:script` component
pub mod interpreter;
/// Component runtime: roots, units, calls and scheduling
pub mod runtime;
/// Shared helpers
pub mod util;

// Re-export key types for convenience
pub use runtime::Root;
pub use runtime::config::RuntimeConfig;
pub use runtime::error::RuntimeError;
pub use runtime::value::{PError, Value};

/// Current version of the Hotwire runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
