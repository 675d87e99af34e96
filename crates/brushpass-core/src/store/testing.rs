//! Fault-injecting store wrapper for tests.

use super::{BoxFuture, MemoryStore, Store, StoreError, StoreResult};
use crate::model::{CanvasSnapshot, Identity, Message, Player, Room, RoomId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Kinds of write a test can hold back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Write {
    Room,
    Player,
    Canvas,
}

/// Holds writes until the test opens it.
pub(crate) struct Gate {
    arrivals: Semaphore,
    open: Semaphore,
}

impl Gate {
    fn new() -> Self {
        Self {
            arrivals: Semaphore::new(0),
            open: Semaphore::new(0),
        }
    }

    async fn pass(&self) {
        self.arrivals.add_permits(1);
        // Closed means open for good.
        if let Ok(permit) = self.open.acquire().await {
            permit.forget();
        }
    }

    /// Wait until `n` writes are held at the gate.
    pub(crate) async fn held(&self, n: u32) {
        if let Ok(permits) = self.arrivals.acquire_many(n).await {
            permits.forget();
        }
    }

    /// Let every held and future write through.
    pub(crate) fn open(&self) {
        self.open.close();
    }
}

/// Wraps a [`MemoryStore`] and fails or holds selected writes.
pub(crate) struct FlakyStore {
    pub(crate) inner: MemoryStore,
    /// Fail updates that raise the turn flag of this identity.
    fail_flag_for: Mutex<Option<Identity>>,
    fail_room_updates: AtomicBool,
    gates: Mutex<HashMap<Write, Arc<Gate>>>,
    pub(crate) player_writes: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_flag_for: Mutex::new(None),
            fail_room_updates: AtomicBool::new(false),
            gates: Mutex::new(HashMap::new()),
            player_writes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_flag_for(&self, identity: Option<Identity>) {
        *self.fail_flag_for.lock().unwrap() = identity;
    }

    pub(crate) fn fail_room_updates(&self, fail: bool) {
        self.fail_room_updates.store(fail, Ordering::SeqCst);
    }

    /// Hold every write of `kind` from now on until the returned gate opens.
    pub(crate) fn gate(&self, kind: Write) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        self.gates.lock().unwrap().insert(kind, gate.clone());
        gate
    }

    fn gate_for(&self, kind: Write) -> Option<Arc<Gate>> {
        self.gates.lock().unwrap().get(&kind).cloned()
    }
}

impl Store for FlakyStore {
    fn insert_room(&self, room: &Room) -> BoxFuture<'_, StoreResult<Room>> {
        self.inner.insert_room(room)
    }

    fn room(&self, id: RoomId) -> BoxFuture<'_, StoreResult<Room>> {
        self.inner.room(id)
    }

    fn room_by_code(&self, code: &str) -> BoxFuture<'_, StoreResult<Room>> {
        self.inner.room_by_code(code)
    }

    fn update_room(&self, room: &Room) -> BoxFuture<'_, StoreResult<Room>> {
        if self.fail_room_updates.load(Ordering::SeqCst) {
            return Box::pin(async { Err(StoreError::Unavailable("injected".into())) });
        }
        let gate = self.gate_for(Write::Room);
        let room = room.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.pass().await;
            }
            self.inner.update_room(&room).await
        })
    }

    fn insert_player(&self, player: &Player) -> BoxFuture<'_, StoreResult<Player>> {
        self.inner.insert_player(player)
    }

    fn update_player(&self, player: &Player) -> BoxFuture<'_, StoreResult<Player>> {
        let fail = player.is_current_turn
            && self.fail_flag_for.lock().unwrap().as_ref() == Some(&player.identity);
        if fail {
            return Box::pin(async { Err(StoreError::Unavailable("injected".into())) });
        }
        self.player_writes.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate_for(Write::Player);
        let player = player.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.pass().await;
            }
            self.inner.update_player(&player).await
        })
    }

    fn delete_player(&self, room_id: RoomId, identity: &Identity) -> BoxFuture<'_, StoreResult<()>> {
        self.inner.delete_player(room_id, identity)
    }

    fn players(&self, room_id: RoomId) -> BoxFuture<'_, StoreResult<Vec<Player>>> {
        self.inner.players(room_id)
    }

    fn append_message(&self, message: &Message) -> BoxFuture<'_, StoreResult<()>> {
        self.inner.append_message(message)
    }

    fn messages(&self, room_id: RoomId) -> BoxFuture<'_, StoreResult<Vec<Message>>> {
        self.inner.messages(room_id)
    }

    fn canvas(&self, room_id: RoomId) -> BoxFuture<'_, StoreResult<CanvasSnapshot>> {
        self.inner.canvas(room_id)
    }

    fn put_canvas(&self, snapshot: &CanvasSnapshot) -> BoxFuture<'_, StoreResult<()>> {
        let gate = self.gate_for(Write::Canvas);
        let snapshot = snapshot.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.pass().await;
            }
            self.inner.put_canvas(&snapshot).await
        })
    }
}
