//! In-memory storage implementation.

use super::{BoxFuture, Store, StoreError, StoreResult};
use crate::bus::{ChangeBus, ChangeEvent, ChangeKind, ChangePayload};
use crate::clock::{Clock, SystemClock};
use crate::model::{CanvasSnapshot, Identity, Message, Player, Room, RoomId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    rooms: HashMap<RoomId, Room>,
    codes: HashMap<String, RoomId>,
    players: HashMap<RoomId, Vec<Player>>,
    messages: HashMap<RoomId, Vec<Message>>,
    canvases: HashMap<RoomId, CanvasSnapshot>,
}

/// In-memory store that publishes every committed write on a [`ChangeBus`].
pub struct MemoryStore {
    tables: RwLock<Tables>,
    bus: ChangeBus,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store publishing to `bus`.
    pub fn new(bus: ChangeBus) -> Self {
        Self::with_clock(bus, Arc::new(SystemClock))
    }

    /// Create an empty store that stamps `updated_at` from `clock`.
    pub fn with_clock(bus: ChangeBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            bus,
            clock,
        }
    }

    /// The bus this store publishes to.
    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| StoreError::Unavailable(format!("Lock error: {}", e)))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| StoreError::Unavailable(format!("Lock error: {}", e)))
    }

    fn publish(&self, room_id: RoomId, kind: ChangeKind, payload: ChangePayload) {
        self.bus.publish(ChangeEvent::new(room_id, kind, payload));
    }
}

impl Store for MemoryStore {
    fn insert_room(&self, room: &Room) -> BoxFuture<'_, StoreResult<Room>> {
        let mut room = room.clone();
        Box::pin(async move {
            {
                let mut tables = self.write()?;
                if tables.codes.contains_key(&room.code) {
                    return Err(StoreError::Conflict(room.code));
                }
                if tables.rooms.contains_key(&room.id) {
                    return Err(StoreError::Conflict(room.id.to_string()));
                }
                room.revision = 1;
                room.updated_at = self.clock.now();
                tables.codes.insert(room.code.clone(), room.id);
                tables.rooms.insert(room.id, room.clone());
            }
            self.publish(room.id, ChangeKind::Insert, ChangePayload::Room(room.clone()));
            Ok(room)
        })
    }

    fn room(&self, id: RoomId) -> BoxFuture<'_, StoreResult<Room>> {
        Box::pin(async move {
            self.read()?
                .rooms
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        })
    }

    fn room_by_code(&self, code: &str) -> BoxFuture<'_, StoreResult<Room>> {
        let code = code.to_string();
        Box::pin(async move {
            let tables = self.read()?;
            tables
                .codes
                .get(&code)
                .and_then(|id| tables.rooms.get(id))
                .cloned()
                .ok_or(StoreError::NotFound(code))
        })
    }

    fn update_room(&self, room: &Room) -> BoxFuture<'_, StoreResult<Room>> {
        let mut room = room.clone();
        Box::pin(async move {
            {
                let mut tables = self.write()?;
                let stored = tables
                    .rooms
                    .get_mut(&room.id)
                    .ok_or_else(|| StoreError::NotFound(room.id.to_string()))?;
                if stored.revision != room.revision {
                    return Err(StoreError::Stale);
                }
                // Identity columns are immutable.
                room.code = stored.code.clone();
                room.host = stored.host.clone();
                room.created_at = stored.created_at;
                room.revision += 1;
                room.updated_at = self.clock.now();
                *stored = room.clone();
            }
            self.publish(room.id, ChangeKind::Update, ChangePayload::Room(room.clone()));
            Ok(room)
        })
    }

    fn insert_player(&self, player: &Player) -> BoxFuture<'_, StoreResult<Player>> {
        let mut player = player.clone();
        Box::pin(async move {
            {
                let mut tables = self.write()?;
                if !tables.rooms.contains_key(&player.room_id) {
                    return Err(StoreError::NotFound(player.room_id.to_string()));
                }
                let roster = tables.players.entry(player.room_id).or_default();
                if roster.iter().any(|p| p.identity == player.identity) {
                    return Err(StoreError::Conflict(player.identity.to_string()));
                }
                if let Some(order) = player.turn_order {
                    if roster.iter().any(|p| p.turn_order == Some(order)) {
                        return Err(StoreError::Conflict(format!("turn_order {}", order)));
                    }
                }
                player.revision = 1;
                roster.push(player.clone());
            }
            self.publish(player.room_id, ChangeKind::Insert, ChangePayload::Player(player.clone()));
            Ok(player)
        })
    }

    fn update_player(&self, player: &Player) -> BoxFuture<'_, StoreResult<Player>> {
        let mut player = player.clone();
        Box::pin(async move {
            {
                let mut tables = self.write()?;
                let stored = tables
                    .players
                    .get_mut(&player.room_id)
                    .and_then(|roster| roster.iter_mut().find(|p| p.identity == player.identity))
                    .ok_or_else(|| StoreError::NotFound(player.identity.to_string()))?;
                if stored.revision != player.revision {
                    return Err(StoreError::Stale);
                }
                player.id = stored.id;
                player.joined_at = stored.joined_at;
                player.revision += 1;
                *stored = player.clone();
            }
            self.publish(player.room_id, ChangeKind::Update, ChangePayload::Player(player.clone()));
            Ok(player)
        })
    }

    fn delete_player(&self, room_id: RoomId, identity: &Identity) -> BoxFuture<'_, StoreResult<()>> {
        let identity = identity.clone();
        Box::pin(async move {
            let removed = {
                let mut tables = self.write()?;
                match tables.players.get_mut(&room_id) {
                    Some(roster) => {
                        let before = roster.len();
                        roster.retain(|p| p.identity != identity);
                        roster.len() != before
                    }
                    None => false,
                }
            };
            if removed {
                self.publish(room_id, ChangeKind::Delete, ChangePayload::PlayerLeft(identity));
            }
            Ok(())
        })
    }

    fn players(&self, room_id: RoomId) -> BoxFuture<'_, StoreResult<Vec<Player>>> {
        Box::pin(async move {
            let tables = self.read()?;
            if !tables.rooms.contains_key(&room_id) {
                return Err(StoreError::NotFound(room_id.to_string()));
            }
            let mut players = tables.players.get(&room_id).cloned().unwrap_or_default();
            players.sort_by_key(|p| p.joined_at);
            Ok(players)
        })
    }

    fn append_message(&self, message: &Message) -> BoxFuture<'_, StoreResult<()>> {
        let message = message.clone();
        Box::pin(async move {
            {
                let mut tables = self.write()?;
                if !tables.rooms.contains_key(&message.room_id) {
                    return Err(StoreError::NotFound(message.room_id.to_string()));
                }
                tables.messages.entry(message.room_id).or_default().push(message.clone());
            }
            self.publish(message.room_id, ChangeKind::Insert, ChangePayload::Message(message));
            Ok(())
        })
    }

    fn messages(&self, room_id: RoomId) -> BoxFuture<'_, StoreResult<Vec<Message>>> {
        Box::pin(async move {
            let tables = self.read()?;
            let mut messages = tables.messages.get(&room_id).cloned().unwrap_or_default();
            // Stable sort keeps insertion order for equal timestamps.
            messages.sort_by_key(|m| m.created_at);
            Ok(messages)
        })
    }

    fn canvas(&self, room_id: RoomId) -> BoxFuture<'_, StoreResult<CanvasSnapshot>> {
        Box::pin(async move {
            let tables = self.read()?;
            match tables.canvases.get(&room_id) {
                Some(snapshot) => Ok(snapshot.clone()),
                None => {
                    let room = tables
                        .rooms
                        .get(&room_id)
                        .ok_or_else(|| StoreError::NotFound(room_id.to_string()))?;
                    Ok(CanvasSnapshot::blank(room_id, room.created_at))
                }
            }
        })
    }

    fn put_canvas(&self, snapshot: &CanvasSnapshot) -> BoxFuture<'_, StoreResult<()>> {
        let snapshot = snapshot.clone();
        Box::pin(async move {
            {
                let mut tables = self.write()?;
                if !tables.rooms.contains_key(&snapshot.room_id) {
                    return Err(StoreError::NotFound(snapshot.room_id.to_string()));
                }
                let stored_version = tables
                    .canvases
                    .get(&snapshot.room_id)
                    .map_or(0, |s| s.version);
                if snapshot.version <= stored_version {
                    return Err(StoreError::Stale);
                }
                tables.canvases.insert(snapshot.room_id, snapshot.clone());
            }
            self.publish(snapshot.room_id, ChangeKind::Update, ChangePayload::Canvas(snapshot));
            Ok(())
        })
    }
}
