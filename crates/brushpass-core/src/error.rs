//! Error types for room coordination.

use crate::model::Phase;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by room operations.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),
    #[error("Not allowed: {0}")]
    Unauthorized(&'static str),
    #[error("Not a member of this room")]
    NotMember,
    #[error("Room is full (max {0} players)")]
    RoomFull(usize),
    #[error("Need at least {0} players to start")]
    NotEnoughPlayers(usize),
    #[error("Action not available while the room is {0}")]
    WrongPhase(Phase),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Inconsistent room state: {0}")]
    Inconsistent(String),
    #[error("Rotation failed, retry")]
    RotationFailed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GameError {
    /// Whether repeating the read-validate-act cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GameError::RotationFailed | GameError::Inconsistent(_) => true,
            GameError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for room operations.
pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(GameError::RotationFailed.is_retryable());
        assert!(GameError::Store(StoreError::Stale).is_retryable());
        assert!(!GameError::RoomFull(7).is_retryable());
        assert!(!GameError::Store(StoreError::Conflict("code".into())).is_retryable());
    }

    #[test]
    fn test_user_visible_messages() {
        assert_eq!(GameError::RoomFull(7).to_string(), "Room is full (max 7 players)");
        assert_eq!(
            GameError::NotEnoughPlayers(2).to_string(),
            "Need at least 2 players to start"
        );
    }
}
