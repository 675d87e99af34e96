//! Room chat.

use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::{GameError, GameResult};
use crate::model::{Identity, Message, RoomId};

impl Coordinator {
    /// Post a chat line. Any member, spectators included, may chat in any
    /// phase. Surrounding whitespace is trimmed.
    pub async fn send_message(&self, room_id: RoomId, identity: &Identity, text: &str) -> GameResult<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GameError::Validation("message is empty".into()));
        }
        if text.chars().count() > self.config.max_message_len {
            return Err(GameError::Validation(format!(
                "message is longer than {} characters",
                self.config.max_message_len
            )));
        }

        let roster = self.roster(room_id).await?;
        let sender = roster.find(identity).ok_or(GameError::NotMember)?;

        let message = Message {
            id: Uuid::new_v4(),
            room_id,
            identity: identity.clone(),
            display_name: sender.display_name.clone(),
            text: text.to_string(),
            created_at: self.clock.now(),
        };
        self.store.append_message(&message).await?;
        log::debug!("chat in room {} from {}", room_id, identity);
        Ok(message)
    }

    /// Chat history, oldest first.
    pub async fn messages(&self, room_id: RoomId) -> GameResult<Vec<Message>> {
        Ok(self.store.messages(room_id).await?)
    }
}
