//! Helpers shared across the crate.

/// Conversion between runtime values and preserves text.
pub mod io_value;
