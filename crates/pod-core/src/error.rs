//! # Error Types — Primitive Validation Errors
//!
//! Errors raised while constructing the foundational types of this crate.
//! Higher layers (state machines, the session coordinator) define their own
//! error enums and wrap these where needed.

use thiserror::Error;

/// Top-level error type for the primitives in `pod-core`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PodError {
    /// A value was outside its permitted domain.
    #[error("validation error: {0}")]
    Validation(String),

    /// A timestamp could not be parsed or represented.
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}
