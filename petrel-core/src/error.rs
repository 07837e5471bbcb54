//! Core error types.

use crate::handle::{PlaceId, TransitionId};
use thiserror::Error;

/// Errors from the net engine.
///
/// Reservation refusal is not represented here: a refused reservation is an
/// ordinary `None` consumed by the firing logic of a transition.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("arc quantity must be positive, got {quantity}")]
    InvalidQuantity { quantity: i64 },

    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("place {place} belongs to a different net")]
    ForeignPlace { place: PlaceId },

    #[error("place not found: {place}")]
    PlaceNotFound { place: PlaceId },

    #[error("transition not found: {transition}")]
    TransitionNotFound { transition: TransitionId },

    #[error("cannot remove non-empty place {place}")]
    PlaceNotEmpty { place: PlaceId },

    #[error("{operation} called during tick")]
    TickInProgress { operation: &'static str },

    #[error("invalid synchronisation state on place {place}: {reason}")]
    Synchronization { place: PlaceId, reason: String },

    #[error("transition {transition} is already being ticked")]
    ConcurrentTick { transition: TransitionId },

    #[error("tick incomplete: {completed} of {total} transitions ran")]
    TickIncomplete { completed: usize, total: usize },

    #[error("tick cancelled after {completed} of {total} transitions")]
    Cancelled { completed: usize, total: usize },

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("invalid net definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl NetError {
    /// Returns whether this error means a tick round could not be trusted.
    ///
    /// Fatal errors abort the whole round; partial state may be visible.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetError::Synchronization { .. }
                | NetError::ConcurrentTick { .. }
                | NetError::TickIncomplete { .. }
                | NetError::Cancelled { .. }
                | NetError::Scheduler(_)
        )
    }

    /// Returns a stable error code suitable for reports and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            NetError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            NetError::InvalidToken { .. } => "INVALID_TOKEN",
            NetError::ForeignPlace { .. } => "FOREIGN_PLACE",
            NetError::PlaceNotFound { .. } => "PLACE_NOT_FOUND",
            NetError::TransitionNotFound { .. } => "TRANSITION_NOT_FOUND",
            NetError::PlaceNotEmpty { .. } => "PLACE_NOT_EMPTY",
            NetError::TickInProgress { .. } => "TICK_IN_PROGRESS",
            NetError::Synchronization { .. } => "SYNCHRONIZATION",
            NetError::ConcurrentTick { .. } => "CONCURRENT_TICK",
            NetError::TickIncomplete { .. } => "TICK_INCOMPLETE",
            NetError::Cancelled { .. } => "CANCELLED",
            NetError::Scheduler(_) => "SCHEDULER",
            NetError::InvalidDefinition { .. } => "BAD_DEFINITION",
            NetError::Json(_) => "BAD_DEFINITION",
            NetError::Yaml(_) => "BAD_DEFINITION",
        }
    }
}
