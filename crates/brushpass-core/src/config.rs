//! Tunable game parameters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GameError, GameResult};

pub const DEFAULT_MIN_PLAYERS: usize = 2;
pub const DEFAULT_MAX_PLAYERS: usize = 7;
pub const DEFAULT_MAX_ROUNDS: u32 = 3;
pub const DEFAULT_TURN_SECS: u64 = 180;
pub const DEFAULT_PICK_SECS: u64 = 30;

/// Game configuration. Every field has a default, so a partial JSON object
/// is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Seated players needed before the host can start.
    pub min_players: usize,
    /// Seat capacity; spectators are not counted.
    pub max_players: usize,
    pub max_rounds: u32,
    pub turn_duration_secs: u64,
    pub pick_duration_secs: u64,
    /// Topics offered to the picker.
    pub topic_shortlist: usize,
    pub max_topic_len: usize,
    pub max_message_len: usize,
    /// Quiet period before local strokes are persisted.
    pub canvas_debounce_ms: u64,
    /// Minimum gap between two rotations started by the same client.
    pub rotation_cooldown_ms: u64,
    /// Attempts at finding an unused join code.
    pub code_attempts: usize,
    /// Room client timer resolution.
    pub tick_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_players: DEFAULT_MIN_PLAYERS,
            max_players: DEFAULT_MAX_PLAYERS,
            max_rounds: DEFAULT_MAX_ROUNDS,
            turn_duration_secs: DEFAULT_TURN_SECS,
            pick_duration_secs: DEFAULT_PICK_SECS,
            topic_shortlist: 3,
            max_topic_len: 100,
            max_message_len: 500,
            canvas_debounce_ms: 1000,
            rotation_cooldown_ms: 2000,
            code_attempts: 8,
            tick_ms: 250,
        }
    }
}

impl GameConfig {
    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> GameResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GameError::Validation(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GameResult<()> {
        if self.min_players < 2 {
            return Err(GameError::Validation("min_players must be at least 2".into()));
        }
        if self.max_players < self.min_players {
            return Err(GameError::Validation("max_players must be >= min_players".into()));
        }
        if self.max_rounds == 0 {
            return Err(GameError::Validation("max_rounds must be at least 1".into()));
        }
        if self.turn_duration_secs == 0 || self.pick_duration_secs == 0 {
            return Err(GameError::Validation("durations must be positive".into()));
        }
        if self.code_attempts == 0 || self.tick_ms == 0 {
            return Err(GameError::Validation("code_attempts and tick_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn turn_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.turn_duration_secs as i64)
    }

    pub fn pick_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pick_duration_secs as i64)
    }

    pub fn canvas_debounce(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.canvas_debounce_ms as i64)
    }

    pub fn rotation_cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.rotation_cooldown_ms as i64)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}
