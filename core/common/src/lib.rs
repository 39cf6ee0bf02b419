//! Common error types shared across the zkvault workspace.
//!
//! Every crate in the workspace reports failures through the single
//! [`Error`] enum defined here, so callers can match on one taxonomy
//! regardless of which layer produced the failure.

pub mod error;

pub use error::{Error, Result};
