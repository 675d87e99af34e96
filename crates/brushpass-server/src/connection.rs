//! One WebSocket connection.
//!
//! A connection says `hello`, then creates or joins a room. Joining attaches
//! a [`RoomClient`] task; room frames become its commands and its updates are
//! written back to the socket. Closing the socket detaches the client without
//! leaving the room, so a reconnect resumes the same seat.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use brushpass_core::{ClientUpdate, Command, GameError, Identity, RoomClient, RoomId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::protocol::{ClientFrame, ServerFrame};

const UPDATE_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 64;

/// The room client a connection is attached to.
struct Attached {
    room_id: RoomId,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

/// Per-connection protocol state.
pub struct Connection {
    state: Arc<AppState>,
    identity: Option<Identity>,
    attached: Option<Attached>,
    updates: mpsc::Sender<ClientUpdate>,
}

impl Connection {
    pub fn new(state: Arc<AppState>) -> (Self, mpsc::Receiver<ClientUpdate>) {
        let (updates, rx) = mpsc::channel(UPDATE_CAPACITY);
        let connection = Self {
            state,
            identity: None,
            attached: None,
            updates,
        };
        (connection, rx)
    }

    /// Handle one frame and return the direct replies. Room state arrives
    /// separately through the update channel.
    pub async fn on_frame(&mut self, frame: ClientFrame) -> Vec<ServerFrame> {
        if let ClientFrame::Hello { identity, name } = frame {
            return self.hello(identity, name);
        }
        let Some(identity) = self.identity.clone() else {
            return vec![ServerFrame::error("Say hello first")];
        };

        let command = match frame {
            ClientFrame::Hello { .. } => return Vec::new(),
            ClientFrame::CreateRoom => {
                if self.attached.is_some() {
                    return vec![ServerFrame::error("Leave your current room first")];
                }
                return match self.state.coordinator.create_room(&identity).await {
                    Ok((room, _)) => self.attach(room.id, identity).await,
                    Err(e) => vec![ServerFrame::error(e.to_string())],
                };
            }
            ClientFrame::Join { code, spectator } => {
                if self.attached.is_some() {
                    return vec![ServerFrame::error("Leave your current room first")];
                }
                return match self.state.coordinator.join(&code, &identity, spectator).await {
                    Ok((room, _)) => self.attach(room.id, identity).await,
                    Err(e) => vec![ServerFrame::error(e.to_string())],
                };
            }
            ClientFrame::StartGame => Command::StartGame,
            ClientFrame::SelectTopic { option, custom } => match ClientFrame::topic_choice(option, custom) {
                Some(choice) => Command::SelectTopic(choice),
                None => return vec![ServerFrame::error("Pick an option or type a topic")],
            },
            ClientFrame::PassTurn => Command::PassTurn,
            ClientFrame::Stroke { stroke } => Command::Draw(stroke),
            ClientFrame::Undo => Command::Undo,
            ClientFrame::Redo => Command::Redo,
            ClientFrame::Clear => Command::Clear,
            ClientFrame::Chat { text } => Command::Chat(text),
            ClientFrame::Leave => Command::Leave,
        };

        let leaving = command == Command::Leave;
        let Some(attached) = &self.attached else {
            return vec![ServerFrame::error(GameError::NotMember.to_string())];
        };
        // Never wait on the room client here: it may itself be waiting for
        // this loop to drain its updates.
        match attached.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return vec![ServerFrame::error("Too many requests, slow down")];
            }
            Err(TrySendError::Closed(_)) => {
                // The room client already stopped.
                self.attached = None;
                return vec![ServerFrame::error(GameError::NotMember.to_string())];
            }
        }
        if leaving {
            self.attached = None;
        }
        Vec::new()
    }

    fn hello(&mut self, identity: String, name: Option<String>) -> Vec<ServerFrame> {
        let identity = identity.trim();
        if identity.is_empty() {
            return vec![ServerFrame::error("Identity must not be empty")];
        }
        if self.identity.as_ref().is_some_and(|current| current.as_str() != identity) {
            return vec![ServerFrame::error("Already identified")];
        }
        let identity = Identity::new(identity);
        if let Some(name) = name {
            self.state.identities.register(identity.clone(), &name);
        }
        self.identity = Some(identity.clone());
        vec![ServerFrame::Welcome { identity }]
    }

    async fn attach(&mut self, room_id: RoomId, identity: Identity) -> Vec<ServerFrame> {
        let client = match RoomClient::enter(
            self.state.coordinator.clone(),
            &self.state.bus,
            room_id,
            identity,
            self.updates.clone(),
        )
        .await
        {
            Ok(client) => client,
            Err(e) => return vec![ServerFrame::error(e.to_string())],
        };

        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let cancel = client.cancel_token();
        tokio::spawn(client.run(rx));
        debug!("connection attached to room {}", room_id);
        self.attached = Some(Attached {
            room_id,
            commands,
            cancel,
        });
        Vec::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(attached) = self.attached.take() {
            debug!("detaching from room {}", attached.room_id);
            attached.cancel.cancel();
        }
    }
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4();
    info!("New connection: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();
    let (mut connection, mut updates) = Connection::new(state);

    'conn: loop {
        tokio::select! {
            msg = receiver.next() => {
                let replies = match msg {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                        Ok(frame) => connection.on_frame(frame).await,
                        Err(e) => {
                            warn!("Invalid message from {}: {}", conn_id, e);
                            vec![ServerFrame::error(format!("Invalid message: {}", e))]
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ignore binary, ping and pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                };
                for frame in &replies {
                    if send(&mut sender, frame).await.is_err() {
                        break 'conn;
                    }
                }
            }

            // The connection holds a sender, so this never yields `None`.
            Some(update) = updates.recv() => {
                if send(&mut sender, &ServerFrame::from(update)).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(connection);
    info!("Connection closed: {}", conn_id);
}

async fn send<S>(sender: &mut S, frame: &ServerFrame) -> Result<(), ()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!("Dropping unserializable frame: {}", e);
            return Ok(());
        }
    };
    sender.send(WsMessage::Text(json.into())).await.map_err(|_| ())
}
