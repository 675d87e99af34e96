//! Persistence abstraction.
//!
//! The store is a keyed table store with single-row conditional updates and
//! ordered per-room scans. It offers no multi-row transactions: callers that
//! touch a room and its players must tolerate partial application.

mod memory;

#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;

use crate::model::{CanvasSnapshot, Identity, Message, Player, Room, RoomId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Unique key already taken: {0}")]
    Conflict(String),
    #[error("Record was modified concurrently")]
    Stale,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Errors that may clear up on a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Stale | StoreError::Unavailable(_))
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future for async operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for room storage backends.
///
/// Conditional updates compare the `revision` of the passed row with the
/// stored one and fail with [`StoreError::Stale`] on mismatch. On success the
/// stored row (with its bumped revision) is returned.
pub trait Store: Send + Sync {
    /// Insert a new room. Fails with `Conflict` if the join code is taken.
    fn insert_room(&self, room: &Room) -> BoxFuture<'_, StoreResult<Room>>;

    /// Load a room by id.
    fn room(&self, id: RoomId) -> BoxFuture<'_, StoreResult<Room>>;

    /// Load a room by join code.
    fn room_by_code(&self, code: &str) -> BoxFuture<'_, StoreResult<Room>>;

    /// Conditionally replace a room.
    fn update_room(&self, room: &Room) -> BoxFuture<'_, StoreResult<Room>>;

    /// Insert a player. Fails with `Conflict` if the identity already has a
    /// row in that room.
    fn insert_player(&self, player: &Player) -> BoxFuture<'_, StoreResult<Player>>;

    /// Conditionally replace a player.
    fn update_player(&self, player: &Player) -> BoxFuture<'_, StoreResult<Player>>;

    /// Delete a player row.
    fn delete_player(&self, room_id: RoomId, identity: &Identity) -> BoxFuture<'_, StoreResult<()>>;

    /// All players of a room in join order.
    fn players(&self, room_id: RoomId) -> BoxFuture<'_, StoreResult<Vec<Player>>>;

    /// Append a chat message.
    fn append_message(&self, message: &Message) -> BoxFuture<'_, StoreResult<()>>;

    /// All messages of a room in creation order.
    fn messages(&self, room_id: RoomId) -> BoxFuture<'_, StoreResult<Vec<Message>>>;

    /// The latest canvas snapshot (version 0 blank canvas if never saved).
    fn canvas(&self, room_id: RoomId) -> BoxFuture<'_, StoreResult<CanvasSnapshot>>;

    /// Store a canvas snapshot. Fails with `Stale` unless its version is
    /// newer than the stored one.
    fn put_canvas(&self, snapshot: &CanvasSnapshot) -> BoxFuture<'_, StoreResult<()>>;
}
