//! Turn scheduling.
//!
//! Rotation hands the turn flag from the current holder to the next seated
//! player. The store has no multi-row transactions, so a rotation is a
//! sequence of single-row writes:
//!
//! 1. clear the outgoing holder's flag (revision-checked, so of two racing
//!    rotations only one gets past this step),
//! 2. advance the room's round and deadline, or move it to voting,
//! 3. raise the incoming holder's flag.
//!
//! Nobody holds the turn between steps 1 and 3, and whoever ends up holding
//! it sees the deadline written in step 2. A failure after step 1 puts the
//! room and the outgoing flag back the way they were and reports
//! [`GameError::RotationFailed`]. Any state left torn by a crash in between is
//! repaired by [`Coordinator::recover_turn_flags`].

use crate::coordinator::Coordinator;
use crate::error::{GameError, GameResult};
use crate::model::{Identity, Phase, Player, Room, RoomId};
use crate::roster::Roster;
use crate::store::StoreError;

/// Result of a rotation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The caller did not hold the turn (or lost the race to someone who
    /// rotated first). Nothing changed.
    NotHolder,
    /// The deadline has not passed yet. Nothing changed.
    NotDue,
    /// The turn moved on.
    Rotated { holder: Identity, round: u32 },
    /// The last round finished and the room moved to voting.
    Finished,
}

impl Coordinator {
    /// Hand the turn to the next seated player.
    ///
    /// Only the current holder may pass. Repeated or concurrent calls for the
    /// same turn rotate at most once.
    pub async fn pass_turn(&self, room_id: RoomId, acting: &Identity) -> GameResult<RotationOutcome> {
        let (room, roster) = self.room_state(room_id).await?;
        if room.phase != Phase::Playing {
            return Ok(RotationOutcome::NotHolder);
        }
        let holder = roster
            .holder()
            .cloned()
            .ok_or_else(|| GameError::Inconsistent("nobody holds the turn".into()))?;
        if &holder.identity != acting {
            log::debug!("{} tried to pass a turn held by {}", acting, holder.identity);
            return Ok(RotationOutcome::NotHolder);
        }
        self.rotate(room, &roster, holder, None).await
    }

    /// Rotate away from `observed_holder` once the turn deadline has passed.
    ///
    /// Any member may call this. Passing the holder the caller saw makes a
    /// stale expiry (the turn already moved on) a no-op.
    pub async fn expire_turn(
        &self,
        room_id: RoomId,
        observed_holder: &Identity,
    ) -> GameResult<RotationOutcome> {
        let (room, roster) = self.room_state(room_id).await?;
        if room.phase != Phase::Playing {
            return Ok(RotationOutcome::NotHolder);
        }
        let Some(holder) = roster.holder().cloned() else {
            return Err(GameError::Inconsistent("nobody holds the turn".into()));
        };
        if &holder.identity != observed_holder {
            return Ok(RotationOutcome::NotHolder);
        }
        if !room.deadline_passed(self.clock.now()) {
            return Ok(RotationOutcome::NotDue);
        }
        log::info!("turn of {} in room {} timed out", holder.identity, room.code);
        self.rotate(room, &roster, holder, None).await
    }

    /// Repair turn flags that disagree with the room phase.
    ///
    /// While playing, exactly one seated player must hold the flag: extras are
    /// cleared and an orphaned turn goes to the first seat. In any other
    /// phase every flag is cleared. Returns whether anything was written.
    pub async fn recover_turn_flags(&self, room_id: RoomId) -> GameResult<bool> {
        let (room, roster) = self.room_state(room_id).await?;
        let mut changed = false;

        let keep = match room.phase {
            Phase::Playing => roster.holder().map(|p| p.identity.clone()),
            _ => None,
        };
        for player in roster.flagged() {
            if Some(&player.identity) != keep.as_ref() {
                self.set_flag(player, false).await?;
                changed = true;
            }
        }

        if room.phase == Phase::Playing && keep.is_none() {
            if let Some(first) = roster.first_seat(None) {
                log::warn!("room {} had no turn holder, giving it to {}", room.code, first.identity);
                self.set_flag(first, true).await?;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Move a room from topic selection into play with `topic`.
    pub(crate) async fn begin_play(&self, room: Room, roster: &Roster, topic: String) -> GameResult<Room> {
        let first = roster
            .first_seat(None)
            .cloned()
            .ok_or_else(|| GameError::Inconsistent("no seated players".into()))?;

        let now = self.clock.now();
        let mut next = room.clone();
        next.phase = Phase::Playing;
        next.topic = Some(topic);
        next.current_round = 1;
        next.pick_deadline = None;
        next.turn_deadline = Some(now + self.config.turn_duration());

        let room = match self.store.update_room(&next).await {
            Ok(room) => room,
            Err(StoreError::Stale) => {
                return self.after_race(room.id, |r| r.phase.is_at_least(Phase::Playing)).await;
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.set_flag(&first, true).await {
            log::warn!("room {} is playing but the first turn was not handed out: {}", room.code, e);
            return Err(GameError::RotationFailed);
        }
        log::info!(
            "room {} playing '{}', {} draws first",
            room.code,
            room.topic.as_deref().unwrap_or_default(),
            first.identity
        );
        Ok(room)
    }

    /// Hand the turn from `outgoing` to the next seat. `departing` is excluded
    /// from the candidates.
    pub(crate) async fn rotate(
        &self,
        room: Room,
        roster: &Roster,
        outgoing: Player,
        departing: Option<&Identity>,
    ) -> GameResult<RotationOutcome> {
        let order = outgoing
            .turn_order
            .ok_or_else(|| GameError::Inconsistent("turn holder has no seat".into()))?;
        let incoming = roster.next_after(order, departing).cloned();

        let mut next_room = room.clone();
        let finished = match &incoming {
            Some(p) => {
                if p.turn_order.is_some_and(|o| o <= order) {
                    next_room.current_round += 1;
                }
                next_room.current_round > room.max_rounds
            }
            None => true,
        };

        // Step 1: whoever clears this flag first owns the rotation.
        let cleared = match self.set_flag(&outgoing, false).await {
            Ok(cleared) => cleared,
            Err(GameError::Store(StoreError::Stale)) => return Ok(RotationOutcome::NotHolder),
            Err(e) => return Err(e),
        };

        if finished {
            next_room.phase = Phase::Voting;
            next_room.current_round = room.max_rounds + 1;
            next_room.turn_deadline = None;
            if let Err(e) = self.store.update_room(&next_room).await {
                log::warn!("room {} could not move to voting: {}", room.code, e);
                self.restore_flag(&cleared).await;
                return Err(GameError::RotationFailed);
            }
            log::info!("room {} finished after {} rounds", room.code, room.max_rounds);
            return Ok(RotationOutcome::Finished);
        }

        let Some(incoming) = incoming else {
            self.restore_flag(&cleared).await;
            return Err(GameError::Inconsistent("no next seat".into()));
        };
        // A lone seat wraps onto the row step 1 just wrote.
        let incoming = if incoming.identity == cleared.identity {
            cleared.clone()
        } else {
            incoming
        };

        // Step 2: the new deadline is in place before anyone holds the turn.
        next_room.turn_deadline = Some(self.clock.now() + self.config.turn_duration());
        let advanced = match self.store.update_room(&next_room).await {
            Ok(advanced) => advanced,
            Err(e) => {
                log::warn!("room {} round/deadline update failed: {}", room.code, e);
                self.restore_flag(&cleared).await;
                return Err(GameError::RotationFailed);
            }
        };

        // Step 3.
        if let Err(e) = self.set_flag(&incoming, true).await {
            log::warn!("handing the turn to {} failed: {}", incoming.identity, e);
            let mut rollback = advanced;
            rollback.current_round = room.current_round;
            rollback.turn_deadline = room.turn_deadline;
            match self.store.update_room(&rollback).await {
                Ok(_) => self.restore_flag(&cleared).await,
                // Someone else moved the room on; flag recovery picks a holder.
                Err(e) => log::warn!("rolling back room {} failed: {}", room.code, e),
            }
            return Err(GameError::RotationFailed);
        }

        log::info!(
            "room {} round {}: turn passed from {} to {}",
            room.code,
            next_room.current_round,
            outgoing.identity,
            incoming.identity
        );
        Ok(RotationOutcome::Rotated {
            holder: incoming.identity,
            round: next_room.current_round,
        })
    }

    async fn set_flag(&self, player: &Player, holds_turn: bool) -> GameResult<Player> {
        let mut next = player.clone();
        next.is_current_turn = holds_turn;
        Ok(self.store.update_player(&next).await?)
    }

    /// Best-effort rollback of a cleared flag. A departed player has no row
    /// left to restore.
    async fn restore_flag(&self, cleared: &Player) {
        if let Err(e) = self.set_flag(cleared, true).await {
            log::warn!("restoring the turn of {} failed: {}", cleared.identity, e);
        }
    }
}
