//! Persisted records: rooms, players, chat messages and canvas snapshots.
//!
//! These are the rows the [`Store`](crate::store::Store) keeps and the bus
//! reports changes for. Every mutable row carries a `revision` that the store
//! bumps on each committed write; conditional updates compare against it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a room.
pub type RoomId = Uuid;

/// An opaque user identity issued by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lifecycle stage of a room. Phases only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Waiting,
    TopicSelection,
    Playing,
    Voting,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Waiting => 0,
            Phase::TopicSelection => 1,
            Phase::Playing => 2,
            Phase::Voting => 3,
        }
    }

    /// Whether `self` is `other` or a later phase.
    pub fn is_at_least(self, other: Phase) -> bool {
        self.rank() >= other.rank()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Waiting => "waiting",
            Phase::TopicSelection => "topic_selection",
            Phase::Playing => "playing",
            Phase::Voting => "voting",
        };
        f.write_str(name)
    }
}

/// One collaborative drawing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Short shareable join code, e.g. `SUNSET47`.
    pub code: String,
    pub host: Identity,
    pub phase: Phase,
    pub topic: Option<String>,
    pub topic_picker: Option<Identity>,
    /// Shortlist offered to the picker; the first entry is the fallback.
    #[serde(default)]
    pub topic_options: Vec<String>,
    /// Starts at 0, becomes 1 when play begins and ends at `max_rounds + 1`.
    pub current_round: u32,
    pub max_rounds: u32,
    /// Set iff `phase == Playing`.
    pub turn_deadline: Option<DateTime<Utc>>,
    /// Set iff `phase == TopicSelection`.
    pub pick_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
}

impl Room {
    /// A fresh room in the waiting phase.
    pub fn new(code: impl Into<String>, host: Identity, max_rounds: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            host,
            phase: Phase::Waiting,
            topic: None,
            topic_picker: None,
            topic_options: Vec::new(),
            current_round: 0,
            max_rounds,
            turn_deadline: None,
            pick_deadline: None,
            created_at: now,
            started_at: None,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn is_host(&self, identity: &Identity) -> bool {
        &self.host == identity
    }

    pub fn is_picker(&self, identity: &Identity) -> bool {
        self.topic_picker.as_ref() == Some(identity)
    }

    /// The deadline that governs the current phase, if any.
    pub fn active_deadline(&self) -> Option<DateTime<Utc>> {
        match self.phase {
            Phase::TopicSelection => self.pick_deadline,
            Phase::Playing => self.turn_deadline,
            _ => None,
        }
    }

    /// Whole seconds left on the active deadline, computed against `now`.
    pub fn seconds_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.active_deadline().map(|deadline| crate::clock::seconds_until(deadline, now))
    }

    /// Whether the active deadline has passed at `now`.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.active_deadline().is_some_and(|deadline| deadline <= now)
    }
}

/// A participant of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub room_id: RoomId,
    pub identity: Identity,
    /// Resolved once at join time.
    pub display_name: String,
    /// `None` for spectators. Never renumbered after a departure.
    pub turn_order: Option<u32>,
    pub is_current_turn: bool,
    pub is_spectator: bool,
    pub joined_at: DateTime<Utc>,
    pub revision: u64,
}

impl Player {
    /// A player with a seat in the turn rotation.
    pub fn seated(
        room_id: RoomId,
        identity: Identity,
        display_name: impl Into<String>,
        turn_order: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            identity,
            display_name: display_name.into(),
            turn_order: Some(turn_order),
            is_current_turn: false,
            is_spectator: false,
            joined_at: now,
            revision: 0,
        }
    }

    /// An observer without a seat.
    pub fn spectator(
        room_id: RoomId,
        identity: Identity,
        display_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            identity,
            display_name: display_name.into(),
            turn_order: None,
            is_current_turn: false,
            is_spectator: true,
            joined_at: now,
            revision: 0,
        }
    }

    /// Seated players take part in the turn rotation.
    pub fn is_seated(&self) -> bool {
        !self.is_spectator && self.turn_order.is_some()
    }
}

/// A chat line. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: RoomId,
    pub identity: Identity,
    pub display_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A versioned full copy of the room's drawing surface.
///
/// `data` is opaque to the store; clients encode a
/// [`CanvasDocument`](crate::canvas::CanvasDocument) into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    pub room_id: RoomId,
    pub version: u64,
    /// Who produced this version. `None` for the initial blank canvas.
    pub author: Option<Identity>,
    pub data: Vec<u8>,
    pub saved_at: DateTime<Utc>,
}

impl CanvasSnapshot {
    /// The blank canvas every room starts with.
    pub fn blank(room_id: RoomId, now: DateTime<Utc>) -> Self {
        Self {
            room_id,
            version: 0,
            author: None,
            data: Vec::new(),
            saved_at: now,
        }
    }
}
