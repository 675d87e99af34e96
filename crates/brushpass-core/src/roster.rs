//! Membership: joining, leaving and the seating order.

use crate::coordinator::Coordinator;
use crate::error::{GameError, GameResult};
use crate::model::{Identity, Phase, Player, Room, RoomId};
use crate::store::StoreError;

/// Attempts at inserting a joining player before giving up on races.
const JOIN_ATTEMPTS: usize = 3;

/// A snapshot of a room's players with seat-order queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    players: Vec<Player>,
}

impl Roster {
    pub fn new(players: Vec<Player>) -> Self {
        Self { players }
    }

    /// Players in join order.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn find(&self, identity: &Identity) -> Option<&Player> {
        self.players.iter().find(|p| &p.identity == identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.find(identity).is_some()
    }

    /// Seated players ordered by `turn_order`.
    pub fn seated(&self) -> Vec<&Player> {
        let mut seated: Vec<&Player> = self.players.iter().filter(|p| p.is_seated()).collect();
        seated.sort_by_key(|p| p.turn_order);
        seated
    }

    pub fn seated_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_seated()).count()
    }

    /// Every player carrying the turn flag. More than one means a bug or a
    /// torn write that [`Coordinator::recover_turn_flags`] repairs.
    pub fn flagged(&self) -> Vec<&Player> {
        self.players.iter().filter(|p| p.is_current_turn).collect()
    }

    /// The single seated player holding the turn.
    pub fn holder(&self) -> Option<&Player> {
        self.seated().into_iter().find(|p| p.is_current_turn)
    }

    /// The seated player with the lowest turn order, ignoring `skip`.
    pub fn first_seat(&self, skip: Option<&Identity>) -> Option<&Player> {
        self.seated()
            .into_iter()
            .find(|p| Some(&p.identity) != skip)
    }

    /// The seated player following `order`, wrapping to the first seat.
    /// `skip` excludes a departing player from consideration.
    pub fn next_after(&self, order: u32, skip: Option<&Identity>) -> Option<&Player> {
        let seated: Vec<&Player> = self
            .seated()
            .into_iter()
            .filter(|p| Some(&p.identity) != skip)
            .collect();
        seated
            .iter()
            .find(|p| p.turn_order.is_some_and(|o| o > order))
            .or_else(|| seated.first())
            .copied()
    }

    /// Turn order for the next player to take a seat.
    pub fn next_turn_order(&self) -> u32 {
        self.players
            .iter()
            .filter_map(|p| p.turn_order)
            .max()
            .map_or(1, |max| max + 1)
    }
}

impl Coordinator {
    /// Join a room by code.
    ///
    /// Rejoining returns the existing row unchanged. Once the game has left the
    /// waiting phase every newcomer becomes a spectator.
    pub async fn join(
        &self,
        code: &str,
        identity: &Identity,
        as_spectator: bool,
    ) -> GameResult<(Room, Player)> {
        let room = self.find_room(code).await?;
        let name = self.resolve_name(identity).await;

        for _ in 0..JOIN_ATTEMPTS {
            let roster = self.roster(room.id).await?;
            if let Some(existing) = roster.find(identity) {
                return Ok((room, existing.clone()));
            }

            let now = self.clock.now();
            let player = if as_spectator || room.phase != Phase::Waiting {
                Player::spectator(room.id, identity.clone(), name.clone(), now)
            } else {
                if roster.seated_count() >= self.config.max_players {
                    return Err(GameError::RoomFull(self.config.max_players));
                }
                Player::seated(room.id, identity.clone(), name.clone(), roster.next_turn_order(), now)
            };

            match self.store.insert_player(&player).await {
                Ok(player) => {
                    log::info!(
                        "{} joined room {} as {}",
                        identity,
                        room.code,
                        if player.is_spectator { "spectator" } else { "player" }
                    );
                    return Ok((room, player));
                }
                // Same identity joining twice, or another joiner took the seat.
                Err(StoreError::Conflict(key)) => {
                    log::debug!("join race in room {} on {}, retrying", room.code, key);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Stale.into())
    }

    /// Leave a room, handing the turn on first if the leaver holds it.
    /// Leaving a room one is not in succeeds without effect.
    pub async fn leave(&self, room_id: RoomId, identity: &Identity) -> GameResult<()> {
        let (room, roster) = self.room_state(room_id).await?;
        let Some(player) = roster.find(identity).cloned() else {
            return Ok(());
        };

        if room.phase == Phase::Playing && player.is_current_turn {
            if let Err(e) = self.rotate(room, &roster, player, Some(identity)).await {
                // The row goes away regardless; flag recovery picks a holder.
                log::warn!("could not hand on the turn of departing {}: {}", identity, e);
            }
        }

        self.store.delete_player(room_id, identity).await?;
        log::info!("{} left room {}", identity, room_id);
        Ok(())
    }

    /// Players of a room as a [`Roster`].
    pub async fn roster(&self, room_id: RoomId) -> GameResult<Roster> {
        Ok(Roster::new(self.store.players(room_id).await?))
    }
}
