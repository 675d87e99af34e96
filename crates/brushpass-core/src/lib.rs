//! Pass the Brush Core Library
//!
//! Room coordination for a turn-based collaborative drawing game: room
//! lifecycle, seating, the turn scheduler, canvas versioning, chat and the
//! per-connection room client that ties them to a change feed.

pub mod bus;
pub mod canvas;
pub mod chat;
pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod model;
pub mod roster;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod words;

pub use bus::{ChangeBus, ChangeEvent, ChangeFilter, Delivery};
pub use canvas::{CanvasDocument, CanvasSync, Stroke, Tool};
pub use client::{ClientUpdate, Command, RoomClient, RoomView};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GameConfig;
pub use coordinator::Coordinator;
pub use error::{GameError, GameResult};
pub use identity::{IdentityProvider, MemoryIdentities};
pub use model::{CanvasSnapshot, Identity, Message, Phase, Player, Room, RoomId};
pub use roster::Roster;
pub use scheduler::RotationOutcome;
pub use session::TopicChoice;
pub use store::{MemoryStore, Store, StoreError};
