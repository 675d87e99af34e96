//! Change notification bus.
//!
//! Every committed write in the store is published here as a [`ChangeEvent`].
//! Subscribers filter by room and table. Delivery is treated as at-least-once
//! and unordered: a slow subscriber can miss events, in which case it is told
//! how many were skipped and must re-fetch.

use tokio::sync::broadcast;

use crate::model::{CanvasSnapshot, Identity, Message, Player, Room, RoomId};

/// Default capacity of the broadcast channel.
pub const BUS_CAPACITY: usize = 256;

/// The table a change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Rooms,
    Players,
    Messages,
    Canvas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// The row as it looks after the change.
#[derive(Debug, Clone)]
pub enum ChangePayload {
    Room(Room),
    Player(Player),
    /// A player row was deleted.
    PlayerLeft(Identity),
    Message(Message),
    Canvas(CanvasSnapshot),
}

/// "A row changed".
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub room_id: RoomId,
    pub table: Table,
    pub kind: ChangeKind,
    pub payload: ChangePayload,
}

impl ChangeEvent {
    pub fn new(room_id: RoomId, kind: ChangeKind, payload: ChangePayload) -> Self {
        let table = match &payload {
            ChangePayload::Room(_) => Table::Rooms,
            ChangePayload::Player(_) | ChangePayload::PlayerLeft(_) => Table::Players,
            ChangePayload::Message(_) => Table::Messages,
            ChangePayload::Canvas(_) => Table::Canvas,
        };
        Self { room_id, table, kind, payload }
    }
}

/// Which events a subscription wants.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    room_id: RoomId,
    tables: Option<Vec<Table>>,
}

impl ChangeFilter {
    /// Every table of one room.
    pub fn room(room_id: RoomId) -> Self {
        Self { room_id, tables: None }
    }

    /// Restrict to the given tables.
    pub fn tables(mut self, tables: &[Table]) -> Self {
        self.tables = Some(tables.to_vec());
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.room_id == self.room_id
            && self.tables.as_ref().is_none_or(|t| t.contains(&event.table))
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(ChangeEvent),
    /// Events were dropped because the subscriber fell behind.
    Missed(u64),
}

/// In-process pub/sub for row changes.
#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        log::trace!("bus: {:?} {:?} in {}", event.kind, event.table, event.room_id);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(BUS_CAPACITY)
    }
}

/// A filtered view of the bus.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
}

impl Subscription {
    /// Wait for the next matching delivery. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(Delivery::Event(event)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => return Some(Delivery::Missed(n)),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(Delivery::Event(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => return Some(Delivery::Missed(n)),
                Err(_) => return None,
            }
        }
    }
}
