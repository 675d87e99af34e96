//! Wire protocol.
//!
//! Frames are JSON objects tagged by `type`:
//! ```json
//! { "type": "hello", "identity": "u-123", "name": "Ada" }
//! { "type": "join", "code": "SUNSET47" }
//! { "type": "stroke", "stroke": { "color": "#1e1e1e", "width": 3, "points": [[0, 0], [4, 2]] } }
//! { "type": "canvas", "version": 7, "data": "<base64-encoded canvas document>" }
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use brushpass_core::{ClientUpdate, Identity, Message, Phase, Player, Room, Stroke, TopicChoice};
use serde::{Deserialize, Serialize};

/// A frame sent by the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Identify the connection. Must come first.
    Hello {
        identity: String,
        #[serde(default)]
        name: Option<String>,
    },
    CreateRoom,
    Join {
        code: String,
        #[serde(default)]
        spectator: bool,
    },
    StartGame,
    /// Either an index into the shortlist or a custom topic.
    SelectTopic {
        #[serde(default)]
        option: Option<usize>,
        #[serde(default)]
        custom: Option<String>,
    },
    PassTurn,
    Stroke { stroke: Stroke },
    Undo,
    Redo,
    Clear,
    Chat { text: String },
    Leave,
}

impl ClientFrame {
    /// The topic choice of a `select_topic` frame. A custom topic wins over
    /// an option index.
    pub fn topic_choice(option: Option<usize>, custom: Option<String>) -> Option<TopicChoice> {
        match (option, custom) {
            (_, Some(custom)) => Some(TopicChoice::Custom(custom)),
            (Some(index), None) => Some(TopicChoice::Option(index)),
            (None, None) => None,
        }
    }
}

/// A frame sent to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome { identity: Identity },
    Room { room: Room },
    Players { players: Vec<Player> },
    History { messages: Vec<Message> },
    Message { message: Message },
    /// Full canvas document, base64 encoded.
    Canvas { version: u64, data: String },
    Countdown { phase: Phase, seconds_left: i64 },
    Notice { text: String },
    Error { message: String },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

impl From<ClientUpdate> for ServerFrame {
    fn from(update: ClientUpdate) -> Self {
        match update {
            ClientUpdate::Room(room) => ServerFrame::Room { room },
            ClientUpdate::Players(players) => ServerFrame::Players { players },
            ClientUpdate::History(messages) => ServerFrame::History { messages },
            ClientUpdate::Message(message) => ServerFrame::Message { message },
            ClientUpdate::Canvas { version, data } => ServerFrame::Canvas {
                version,
                data: BASE64.encode(data),
            },
            ClientUpdate::Countdown {
                phase,
                seconds_left,
            } => ServerFrame::Countdown {
                phase,
                seconds_left,
            },
            ClientUpdate::Notice(text) => ServerFrame::Notice { text },
            ClientUpdate::Error(message) => ServerFrame::Error { message },
        }
    }
}
