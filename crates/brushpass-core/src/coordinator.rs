//! The room coordinator.
//!
//! [`Coordinator`] is the handle every client uses to act on a room. It holds
//! no room state of its own: each operation re-reads the authoritative rows,
//! validates the acting identity against them and then writes with
//! revision-checked updates. Operations are spread over the `session`,
//! `roster`, `scheduler`, `canvas` and `chat` modules.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::GameConfig;
use crate::error::{GameError, GameResult};
use crate::identity::{ANONYMOUS, IdentityProvider};
use crate::model::{Identity, Room, RoomId};
use crate::roster::Roster;
use crate::store::{Store, StoreError};

/// Shared entry point for room operations.
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) identities: Arc<dyn IdentityProvider>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: GameConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Store>,
        identities: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: GameConfig,
    ) -> Self {
        Self {
            store,
            identities,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Load a room by id.
    pub async fn room(&self, room_id: RoomId) -> GameResult<Room> {
        self.store.room(room_id).await.map_err(|e| not_found(e, room_id.to_string()))
    }

    /// Load a room by its join code (case-insensitive).
    pub async fn find_room(&self, code: &str) -> GameResult<Room> {
        let code = crate::words::normalize_code(code);
        self.store.room_by_code(&code).await.map_err(|e| not_found(e, code))
    }

    /// Authoritative room and roster, read fresh from the store.
    pub async fn room_state(&self, room_id: RoomId) -> GameResult<(Room, Roster)> {
        let room = self.room(room_id).await?;
        let players = self.store.players(room_id).await?;
        Ok((room, Roster::new(players)))
    }

    /// Re-read a room after losing a revision race. Returns it if the race
    /// winner already produced the state we wanted, otherwise reports `Stale`.
    pub(crate) async fn after_race(
        &self,
        room_id: RoomId,
        reached: impl Fn(&Room) -> bool,
    ) -> GameResult<Room> {
        let room = self.room(room_id).await?;
        if reached(&room) {
            Ok(room)
        } else {
            Err(StoreError::Stale.into())
        }
    }

    pub(crate) async fn resolve_name(&self, identity: &Identity) -> String {
        self.identities
            .display_name(identity)
            .await
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }
}

fn not_found(err: StoreError, key: String) -> GameError {
    match err {
        StoreError::NotFound(_) => GameError::RoomNotFound(key),
        other => other.into(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::bus::ChangeBus;
    use crate::clock::ManualClock;
    use crate::identity::MemoryIdentities;
    use crate::model::Player;
    use crate::session::TopicChoice;
    use crate::store::MemoryStore;
    use crate::store::testing::FlakyStore;

    pub(crate) struct Harness {
        pub coordinator: Coordinator,
        pub clock: Arc<ManualClock>,
        pub bus: ChangeBus,
        pub identities: Arc<MemoryIdentities>,
    }

    pub(crate) fn harness() -> Harness {
        harness_with(GameConfig::default())
    }

    pub(crate) fn harness_with(config: GameConfig) -> Harness {
        let bus = ChangeBus::default();
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(bus.clone(), clock.clone()));
        harness_on(store, bus, clock, config)
    }

    pub(crate) fn harness_on(
        store: Arc<dyn Store>,
        bus: ChangeBus,
        clock: Arc<ManualClock>,
        config: GameConfig,
    ) -> Harness {
        let identities = Arc::new(MemoryIdentities::new());
        let coordinator = Coordinator::new(store, identities.clone(), clock.clone(), config);
        Harness {
            coordinator,
            clock,
            bus,
            identities,
        }
    }

    /// A harness whose store can fail or hold writes.
    pub(crate) fn flaky_harness() -> (Harness, Arc<FlakyStore>) {
        let bus = ChangeBus::default();
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(FlakyStore::new(MemoryStore::with_clock(bus.clone(), clock.clone())));
        let h = harness_on(store.clone(), bus, clock, GameConfig::default());
        (h, store)
    }

    pub(crate) fn id(name: &str) -> Identity {
        Identity::new(name)
    }

    impl Harness {
        /// A waiting room hosted by the first identity with every listed
        /// identity seated in order.
        pub(crate) async fn room_with(&self, names: &[&str]) -> Room {
            let (room, _) = self.coordinator.create_room(&id(names[0])).await.unwrap();
            for name in &names[1..] {
                self.coordinator.join(&room.code, &id(name), false).await.unwrap();
            }
            room
        }

        /// A room already in play with the first listed identity drawing.
        pub(crate) async fn playing_room(&self, names: &[&str]) -> Room {
            let room = self.room_with(names).await;
            let room = self.coordinator.start_game(room.id, &id(names[0])).await.unwrap();
            let picker = room.topic_picker.clone().unwrap();
            self.coordinator
                .select_topic(room.id, &picker, TopicChoice::Option(0))
                .await
                .unwrap()
        }

        pub(crate) async fn players(&self, room_id: RoomId) -> Vec<Player> {
            self.coordinator.store.players(room_id).await.unwrap()
        }

        /// Everyone whose turn flag is raised.
        pub(crate) async fn flagged(&self, room_id: RoomId) -> Vec<Identity> {
            self.players(room_id)
                .await
                .into_iter()
                .filter(|p| p.is_current_turn)
                .map(|p| p.identity)
                .collect()
        }

        pub(crate) async fn holder(&self, room_id: RoomId) -> Option<Identity> {
            let flagged = self.flagged(room_id).await;
            assert!(flagged.len() <= 1, "more than one turn holder: {:?}", flagged);
            flagged.into_iter().next()
        }
    }
}
