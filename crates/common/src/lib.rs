//! Shared types and error plumbing used across all kolbridge crates.

pub mod error;
pub mod types;

pub use error::FromMessage;
