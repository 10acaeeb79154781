//! Routing-specific error types

use thiserror::Error;

/// Errors raised by the task router and its stores
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    /// Every known model was excluded by a hard constraint
    #[error("no routing candidate for task '{task_type}': {reason}")]
    NoCandidates { task_type: String, reason: String },

    /// The capability store holds no models at all
    #[error("no model capabilities registered")]
    NoProfiles,

    /// A descriptor id did not resolve
    #[error("model not found: {id}")]
    ModelNotFound { id: String },

    /// A strategy name did not match any preset
    #[error("unknown routing strategy: {0}")]
    UnknownStrategy(String),

    /// Weights were negative, non-finite, or all zero
    #[error("invalid routing weights: {0}")]
    InvalidWeights(String),

    /// Backing store failure
    #[error("store error: {0}")]
    Store(String),
}
