//! Room lifecycle: creation, starting the game and picking the topic.

use rand::seq::IndexedRandom;

use crate::coordinator::Coordinator;
use crate::error::{GameError, GameResult};
use crate::model::{Identity, Phase, Player, Room, RoomId};
use crate::store::StoreError;
use crate::words;

/// The picker's answer to the topic shortlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicChoice {
    /// Index into the room's `topic_options`.
    Option(usize),
    /// A custom topic typed by the picker.
    Custom(String),
}

impl Coordinator {
    /// Create a room hosted by `host`, who takes the first seat.
    pub async fn create_room(&self, host: &Identity) -> GameResult<(Room, Player)> {
        let name = self.resolve_name(host).await;

        for _ in 0..self.config.code_attempts {
            let code = words::generate_code(&mut rand::rng());
            let room = Room::new(code, host.clone(), self.config.max_rounds, self.clock.now());
            let room = match self.store.insert_room(&room).await {
                Ok(room) => room,
                Err(StoreError::Conflict(code)) => {
                    log::debug!("join code {} taken, drawing another", code);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let seat = Player::seated(room.id, host.clone(), name, 1, self.clock.now());
            let seat = self.store.insert_player(&seat).await?;
            log::info!("{} created room {}", host, room.code);
            return Ok((room, seat));
        }

        Err(StoreError::Conflict("no free join code".into()).into())
    }

    /// Start the game: choose a topic picker and a shortlist.
    ///
    /// Host only. Starting an already started game returns it unchanged.
    pub async fn start_game(&self, room_id: RoomId, acting: &Identity) -> GameResult<Room> {
        let (room, roster) = self.room_state(room_id).await?;
        if !room.is_host(acting) {
            return Err(GameError::Unauthorized("only the host can start the game"));
        }
        if room.phase != Phase::Waiting {
            return Ok(room);
        }

        let seated = roster.seated();
        if seated.len() < self.config.min_players {
            return Err(GameError::NotEnoughPlayers(self.config.min_players));
        }

        let (picker, options) = {
            let mut rng = rand::rng();
            let picker = seated.choose(&mut rng).map(|p| p.identity.clone());
            (picker, words::sample_topics(&mut rng, self.config.topic_shortlist))
        };

        let now = self.clock.now();
        let mut next = room.clone();
        next.phase = Phase::TopicSelection;
        next.topic = None;
        next.topic_picker = picker;
        next.topic_options = options;
        next.pick_deadline = Some(now + self.config.pick_duration());
        next.started_at = Some(now);

        match self.store.update_room(&next).await {
            Ok(room) => {
                log::info!(
                    "room {} started with {} players, {} picks the topic",
                    room.code,
                    seated.len(),
                    room.topic_picker.as_ref().map(Identity::as_str).unwrap_or_default()
                );
                Ok(room)
            }
            Err(StoreError::Stale) => {
                self.after_race(room_id, |r| r.phase.is_at_least(Phase::TopicSelection))
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The picker's choice of topic. Starts play.
    pub async fn select_topic(
        &self,
        room_id: RoomId,
        acting: &Identity,
        choice: TopicChoice,
    ) -> GameResult<Room> {
        let (room, roster) = self.room_state(room_id).await?;
        if !room.is_picker(acting) {
            return Err(GameError::Unauthorized("only the topic picker can choose"));
        }
        match room.phase {
            Phase::TopicSelection => {}
            Phase::Waiting => return Err(GameError::WrongPhase(room.phase)),
            Phase::Playing | Phase::Voting => return Ok(room),
        }

        let topic = match choice {
            TopicChoice::Option(index) => room
                .topic_options
                .get(index)
                .cloned()
                .ok_or_else(|| GameError::Validation(format!("no topic option {}", index)))?,
            TopicChoice::Custom(text) => self.validate_topic(&text)?,
        };
        self.begin_play(room, &roster, topic).await
    }

    /// Fall back to the first shortlisted topic once the pick deadline has
    /// passed. Anyone may call this; returns `None` when nothing was due.
    pub async fn expire_topic_selection(&self, room_id: RoomId) -> GameResult<Option<Room>> {
        let (room, roster) = self.room_state(room_id).await?;
        if room.phase != Phase::TopicSelection || !room.deadline_passed(self.clock.now()) {
            return Ok(None);
        }
        let topic = room
            .topic_options
            .first()
            .cloned()
            .unwrap_or_else(|| words::FREE_DRAW.to_string());
        log::info!("room {} topic pick timed out, using '{}'", room.code, topic);
        self.begin_play(room, &roster, topic).await.map(Some)
    }

    fn validate_topic(&self, text: &str) -> GameResult<String> {
        let topic = text.trim();
        if topic.is_empty() {
            return Err(GameError::Validation("topic is empty".into()));
        }
        if topic.chars().count() > self.config.max_topic_len {
            return Err(GameError::Validation(format!(
                "topic is longer than {} characters",
                self.config.max_topic_len
            )));
        }
        Ok(topic.to_string())
    }
}
