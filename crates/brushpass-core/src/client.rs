//! Per-connection room client.
//!
//! A [`RoomClient`] keeps a local cache of one room, turns user commands into
//! coordinator calls and reacts to store changes and the clock. Everything it
//! does runs inside a single reducer loop ([`RoomClient::run`]), so commands,
//! change deliveries and timer ticks never interleave.
//!
//! The client also drives deadlines. The drawer's client passes the turn when
//! its own deadline runs out; every other client expires a turn that stays
//! overdue past a grace period, so a vanished drawer cannot stall the room.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::bus::{ChangeBus, ChangeFilter, ChangePayload, Delivery, Subscription};
use crate::canvas::{CanvasSync, Stroke};
use crate::coordinator::Coordinator;
use crate::error::{GameError, GameResult};
use crate::model::{Identity, Message, Phase, Player, Room, RoomId};
use crate::roster::Roster;
use crate::scheduler::RotationOutcome;
use crate::session::TopicChoice;
use crate::store::StoreError;

/// How long an overdue turn or broken turn flags are tolerated before a
/// non-drawer steps in.
const STALL_GRACE_SECS: i64 = 5;

/// User intents.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartGame,
    SelectTopic(TopicChoice),
    PassTurn,
    Draw(Stroke),
    Undo,
    Redo,
    Clear,
    Chat(String),
    Leave,
}

/// What the client tells its user.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientUpdate {
    Room(Room),
    Players(Vec<Player>),
    History(Vec<Message>),
    Message(Message),
    Canvas { version: u64, data: Vec<u8> },
    Countdown { phase: Phase, seconds_left: i64 },
    Notice(String),
    Error(String),
}

/// Locally cached room state.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub room: Room,
    pub roster: Roster,
    pub messages: Vec<Message>,
}

impl RoomView {
    async fn fetch(coordinator: &Coordinator, room_id: RoomId) -> GameResult<Self> {
        let (room, roster) = coordinator.room_state(room_id).await?;
        let messages = coordinator.messages(room_id).await?;
        Ok(Self {
            room,
            roster,
            messages,
        })
    }

    pub fn holder(&self) -> Option<&Identity> {
        match self.room.phase {
            Phase::Playing => self.roster.holder().map(|p| &p.identity),
            _ => None,
        }
    }

    /// Turn flags that disagree with the phase.
    fn flags_broken(&self) -> bool {
        let flagged = self.roster.flagged().len();
        match self.room.phase {
            Phase::Playing => flagged != 1 || self.roster.holder().is_none(),
            _ => flagged > 0,
        }
    }
}

/// A member's connection to one room.
pub struct RoomClient {
    coordinator: Coordinator,
    identity: Identity,
    view: RoomView,
    canvas: CanvasSync,
    subscription: Subscription,
    updates: mpsc::Sender<ClientUpdate>,
    cancel: CancellationToken,
    /// When this client last attempted a rotation.
    last_rotation: Option<DateTime<Utc>>,
    last_countdown: Option<(Phase, i64)>,
    flags_broken_since: Option<DateTime<Utc>>,
    /// When this client last saw itself take the turn.
    drawing_since: Option<DateTime<Utc>>,
}

impl RoomClient {
    /// Attach `identity`, which must already be a member, to a room.
    ///
    /// The change subscription is opened before the initial fetch; changes
    /// committed in between are buffered and applied once the loop runs.
    pub async fn enter(
        coordinator: Coordinator,
        bus: &ChangeBus,
        room_id: RoomId,
        identity: Identity,
        updates: mpsc::Sender<ClientUpdate>,
    ) -> GameResult<Self> {
        let subscription = bus.subscribe(ChangeFilter::room(room_id));
        let view = RoomView::fetch(&coordinator, room_id).await?;
        if !view.roster.contains(&identity) {
            return Err(GameError::NotMember);
        }

        let mut canvas = CanvasSync::new(coordinator.config().canvas_debounce());
        canvas.load(&coordinator.load_canvas(room_id).await?);

        let drawing_since = (view.holder() == Some(&identity)).then(|| coordinator.clock().now());
        log::debug!("{} attached to room {}", identity, view.room.code);
        Ok(Self {
            coordinator,
            identity,
            view,
            canvas,
            subscription,
            updates,
            cancel: CancellationToken::new(),
            last_rotation: None,
            last_countdown: None,
            flags_broken_since: None,
            drawing_since,
        })
    }

    pub fn room_id(&self) -> RoomId {
        self.view.room.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn view(&self) -> &RoomView {
        &self.view
    }

    pub fn canvas(&self) -> &CanvasSync {
        &self.canvas
    }

    /// Cancelling this token stops [`run`](Self::run).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_drawer(&self) -> bool {
        self.view.holder() == Some(&self.identity)
    }

    /// Drive the client until it leaves, the command channel closes or the
    /// cancel token fires. Nothing is applied after the loop ends.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.publish_state().await;

        let mut ticker = tokio::time::interval(self.coordinator.config().tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                delivery = self.subscription.recv() => match delivery {
                    Some(delivery) => self.on_delivery(delivery).await,
                    None => break,
                },
                _ = ticker.tick() => self.tick().await,
            }
        }

        cancel.cancel();
        log::debug!("{} detached from room {}", self.identity, self.view.room.code);
    }

    /// Apply one command. Returns `false` once the client has left.
    pub async fn handle(&mut self, command: Command) -> bool {
        let room_id = self.room_id();
        let now = self.coordinator.clock().now();
        match command {
            Command::StartGame => {
                let result = self.coordinator.start_game(room_id, &self.identity).await;
                self.after_action(result.map(|_| ())).await;
            }
            Command::SelectTopic(choice) => {
                let result = self.coordinator.select_topic(room_id, &self.identity, choice).await;
                self.after_action(result.map(|_| ())).await;
            }
            Command::PassTurn => self.pass_turn().await,
            Command::Draw(stroke) => {
                if self.ensure_drawer().await {
                    self.canvas.draw(stroke, now);
                }
            }
            Command::Undo => {
                if self.ensure_drawer().await && self.canvas.undo(now) {
                    self.emit_canvas().await;
                }
            }
            Command::Redo => {
                if self.ensure_drawer().await && self.canvas.redo(now) {
                    self.emit_canvas().await;
                }
            }
            Command::Clear => {
                if self.ensure_drawer().await && self.canvas.clear(now) {
                    self.emit_canvas().await;
                }
            }
            Command::Chat(text) => {
                if let Err(e) = self.coordinator.send_message(room_id, &self.identity, &text).await {
                    self.report(e).await;
                }
            }
            Command::Leave => {
                self.leave().await;
                return false;
            }
        }
        true
    }

    /// Apply every change delivery already waiting.
    pub async fn drain_changes(&mut self) {
        while let Some(delivery) = self.subscription.try_recv() {
            self.on_delivery(delivery).await;
        }
    }

    async fn on_delivery(&mut self, delivery: Delivery) {
        let event = match delivery {
            Delivery::Event(event) => event,
            Delivery::Missed(n) => {
                log::warn!("missed {} changes in room {}, resyncing", n, self.view.room.code);
                self.resync().await;
                return;
            }
        };

        match event.payload {
            // Turn and phase state is always re-read rather than patched.
            ChangePayload::Room(_) | ChangePayload::Player(_) | ChangePayload::PlayerLeft(_) => {
                self.refresh().await
            }
            ChangePayload::Message(message) => {
                if !self.view.messages.iter().any(|m| m.id == message.id) {
                    self.view.messages.push(message.clone());
                    self.emit(ClientUpdate::Message(message)).await;
                }
            }
            ChangePayload::Canvas(snapshot) => {
                let drawer = self.is_drawer();
                if self.canvas.apply_remote(&snapshot, drawer) {
                    self.emit(ClientUpdate::Canvas {
                        version: snapshot.version,
                        data: snapshot.data,
                    })
                    .await;
                }
            }
        }
    }

    /// Periodic work: countdowns, canvas saves and deadlines.
    pub async fn tick(&mut self) {
        let now = self.coordinator.clock().now();

        if let Some(seconds_left) = self.view.room.seconds_left(now) {
            let countdown = (self.view.room.phase, seconds_left);
            if self.last_countdown != Some(countdown) {
                self.last_countdown = Some(countdown);
                self.emit(ClientUpdate::Countdown {
                    phase: countdown.0,
                    seconds_left,
                })
                .await;
            }
        }

        if self.is_drawer() && self.canvas.flush_due(now) {
            self.flush_canvas().await;
        }

        if self.flags_broken_since.is_some_and(|since| since + stall_grace() <= now) {
            match self.coordinator.recover_turn_flags(self.room_id()).await {
                Ok(_) => self.refresh().await,
                Err(e) => log::warn!("turn flag recovery in room {} failed: {}", self.view.room.code, e),
            }
            self.flags_broken_since = None;
        }

        if !self.view.room.deadline_passed(now) {
            return;
        }
        let phase = self.view.room.phase;
        match phase {
            Phase::TopicSelection => match self.coordinator.expire_topic_selection(self.room_id()).await {
                Ok(Some(_)) => self.refresh().await,
                Ok(None) => {}
                Err(e) => log::warn!("topic expiry in room {} failed: {}", self.view.room.code, e),
            },
            Phase::Playing if self.is_drawer() => {
                // A deadline that had already passed when this client got the
                // turn is only acted on once it is overdue.
                let inherited = match (self.view.room.turn_deadline, self.drawing_since) {
                    (Some(deadline), Some(since)) => deadline <= since,
                    _ => false,
                };
                if !inherited || self.overdue(now) {
                    self.pass_turn().await;
                }
            }
            Phase::Playing => self.expire_stalled_turn(now).await,
            _ => {}
        }
    }

    /// The turn deadline passed more than the grace period ago.
    fn overdue(&self, now: DateTime<Utc>) -> bool {
        self.view
            .room
            .turn_deadline
            .is_some_and(|deadline| deadline + stall_grace() <= now)
    }

    async fn expire_stalled_turn(&mut self, now: DateTime<Utc>) {
        let Some(holder) = self.view.holder().cloned() else {
            return;
        };
        if !self.overdue(now) || !self.claim_rotation(now) {
            return;
        }
        match self.coordinator.expire_turn(self.room_id(), &holder).await {
            Ok(RotationOutcome::Rotated { .. } | RotationOutcome::Finished) => {
                log::info!("{} expired the stalled turn of {}", self.identity, holder);
            }
            Ok(_) => {}
            Err(e) => log::warn!("expiring the turn of {} failed: {}", holder, e),
        }
        self.refresh().await;
    }

    /// Rotations from this client are spaced by the cooldown so a manual pass
    /// and the deadline timer cannot fire back to back.
    fn claim_rotation(&mut self, now: DateTime<Utc>) -> bool {
        let cooldown = self.coordinator.config().rotation_cooldown();
        if self.last_rotation.is_some_and(|at| now < at + cooldown) {
            return false;
        }
        self.last_rotation = Some(now);
        true
    }

    async fn pass_turn(&mut self) {
        let now = self.coordinator.clock().now();
        if !self.claim_rotation(now) {
            log::debug!("{} pass ignored during cooldown", self.identity);
            return;
        }
        if self.is_drawer() && self.canvas.is_dirty() {
            self.flush_canvas().await;
        }

        match self.coordinator.pass_turn(self.room_id(), &self.identity).await {
            Ok(RotationOutcome::Finished) => {
                self.emit(ClientUpdate::Notice("The last round is over".into())).await;
            }
            Ok(RotationOutcome::Rotated { holder, round }) => {
                log::debug!("{} passed to {} (round {})", self.identity, holder, round);
            }
            Ok(_) => {}
            Err(e) => self.report(e).await,
        }
        self.last_rotation = Some(self.coordinator.clock().now());
        self.refresh().await;
    }

    async fn ensure_drawer(&mut self) -> bool {
        if self.is_drawer() {
            return true;
        }
        self.report(GameError::Unauthorized("only the current drawer can draw")).await;
        false
    }

    async fn flush_canvas(&mut self) {
        let room_id = self.room_id();
        let (version, data) = match self.canvas.pending() {
            Ok(pending) => pending,
            Err(e) => {
                self.report(e).await;
                return;
            }
        };

        let now = self.coordinator.clock().now();
        match self.coordinator.save_canvas(room_id, &self.identity, version, data).await {
            Ok(_) => self.canvas.confirm(version),
            // Someone saved a newer drawing this client never saw.
            Err(GameError::Store(StoreError::Stale)) => match self.coordinator.load_canvas(room_id).await {
                Ok(latest) => {
                    self.canvas.rebase(&latest, now);
                    self.emit_canvas().await;
                }
                Err(e) => {
                    log::warn!("loading canvas of room {} failed: {}", self.view.room.code, e);
                    self.canvas.fail(now);
                }
            },
            Err(GameError::Unauthorized(_) | GameError::WrongPhase(_)) => {
                log::debug!("{} is no longer drawing, dropping local edits", self.identity);
                self.reload_canvas().await;
            }
            Err(e) => {
                log::warn!("canvas save in room {} failed: {}", self.view.room.code, e);
                self.canvas.fail(now);
                self.emit(ClientUpdate::Notice("Drawing not saved yet, retrying".into())).await;
            }
        }
    }

    /// Pick up a newer stored drawing unless local edits are pending.
    async fn catch_up_canvas(&mut self) {
        match self.coordinator.load_canvas(self.room_id()).await {
            Ok(snapshot) => {
                if self.canvas.catch_up(&snapshot) {
                    self.emit_canvas().await;
                }
            }
            Err(e) => log::warn!("loading canvas of room {} failed: {}", self.view.room.code, e),
        }
    }

    async fn reload_canvas(&mut self) {
        match self.coordinator.load_canvas(self.room_id()).await {
            Ok(snapshot) => {
                self.canvas.load(&snapshot);
                self.emit_canvas().await;
            }
            Err(e) => log::warn!("reloading canvas of room {} failed: {}", self.view.room.code, e),
        }
    }

    async fn leave(&mut self) {
        if self.is_drawer() && self.canvas.is_dirty() {
            self.flush_canvas().await;
        }
        match self.coordinator.leave(self.room_id(), &self.identity).await {
            Ok(()) => self.emit(ClientUpdate::Notice("You left the room".into())).await,
            Err(e) => self.report(e).await,
        }
        self.cancel.cancel();
    }

    async fn after_action(&mut self, result: GameResult<()>) {
        if let Err(e) = result {
            self.report(e).await;
        }
        self.refresh().await;
    }

    /// Re-read room and roster, emitting whatever changed.
    async fn refresh(&mut self) {
        let (room, roster) = match self.coordinator.room_state(self.room_id()).await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("refreshing room {} failed: {}", self.view.room.code, e);
                return;
            }
        };

        let was_drawer = self.is_drawer();
        let room_changed = room != self.view.room;
        let roster_changed = roster != self.view.roster;
        self.view.room = room;
        self.view.roster = roster;

        let now = self.coordinator.clock().now();
        self.flags_broken_since = match (self.view.flags_broken(), self.flags_broken_since) {
            (true, since) => since.or(Some(now)),
            (false, _) => None,
        };
        let drawer = self.is_drawer();
        if !drawer {
            self.drawing_since = None;
        } else if !was_drawer {
            self.drawing_since = Some(now);
            // The previous drawer's last save may not have reached us yet.
            self.catch_up_canvas().await;
        }

        if room_changed {
            self.emit(ClientUpdate::Room(self.view.room.clone())).await;
        }
        if roster_changed {
            self.emit(ClientUpdate::Players(self.view.roster.players().to_vec())).await;
        }
        if self.canvas.is_dirty() && !self.is_drawer() {
            self.reload_canvas().await;
        }
    }

    /// Full refetch after missing changes.
    async fn resync(&mut self) {
        self.refresh().await;
        match self.coordinator.messages(self.room_id()).await {
            Ok(messages) => {
                self.view.messages = messages;
                self.emit(ClientUpdate::History(self.view.messages.clone())).await;
            }
            Err(e) => log::warn!("refetching chat failed: {}", e),
        }
        self.catch_up_canvas().await;
    }

    async fn publish_state(&mut self) {
        self.emit(ClientUpdate::Room(self.view.room.clone())).await;
        self.emit(ClientUpdate::Players(self.view.roster.players().to_vec())).await;
        self.emit(ClientUpdate::History(self.view.messages.clone())).await;
        self.emit_canvas().await;
    }

    async fn emit_canvas(&self) {
        match self.canvas.document().to_bytes() {
            Ok(data) => {
                self.emit(ClientUpdate::Canvas {
                    version: self.canvas.version(),
                    data,
                })
                .await
            }
            Err(e) => log::warn!("encoding canvas failed: {}", e),
        }
    }

    async fn report(&self, err: GameError) {
        log::debug!("{} in room {}: {}", self.identity, self.view.room.code, err);
        self.emit(ClientUpdate::Error(err.to_string())).await;
    }

    async fn emit(&self, update: ClientUpdate) {
        // The receiving side going away ends the session through cancellation.
        let _ = self.updates.send(update).await;
    }
}

fn stall_grace() -> Duration {
    Duration::seconds(STALL_GRACE_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasDocument, Tool};
    use crate::clock::Clock;
    use crate::coordinator::test_support::{Harness, flaky_harness, harness, id};
    use crate::store::Store;
    use crate::store::testing::Write;
    use std::sync::atomic::Ordering;

    async fn attach(h: &Harness, room: &Room, name: &str) -> (RoomClient, mpsc::Receiver<ClientUpdate>) {
        let (tx, rx) = mpsc::channel(1024);
        let client = RoomClient::enter(h.coordinator.clone(), &h.bus, room.id, id(name), tx)
            .await
            .unwrap();
        (client, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ClientUpdate>) -> Vec<ClientUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    fn stroke() -> Stroke {
        Stroke::new(Tool::Pencil, "#e03131", 3.0, vec![[0.0, 0.0], [5.0, 5.0]])
    }

    #[tokio::test]
    async fn test_strangers_cannot_attach() {
        let h = harness();
        let room = h.room_with(&["a"]).await;
        let (tx, _rx) = mpsc::channel(8);
        let result = RoomClient::enter(h.coordinator.clone(), &h.bus, room.id, id("x"), tx).await;
        assert!(matches!(result, Err(GameError::NotMember)));
    }

    #[tokio::test]
    async fn test_drawing_reaches_viewers_after_debounce() {
        let h = harness();
        let room = h.playing_room(&["a", "b"]).await;
        let (mut a, _a_rx) = attach(&h, &room, "a").await;
        let (mut b, mut b_rx) = attach(&h, &room, "b").await;
        assert!(a.is_drawer());

        a.handle(Command::Draw(stroke())).await;
        a.tick().await;
        b.drain_changes().await;
        assert_eq!(b.canvas().version(), 0);

        h.clock.advance(Duration::milliseconds(1000));
        a.tick().await;
        assert!(!a.canvas().is_dirty());
        assert_eq!(a.canvas().version(), 1);

        b.drain_changes().await;
        assert_eq!(b.canvas().version(), 1);
        assert_eq!(b.canvas().document().len(), 1);
        assert!(drain(&mut b_rx).iter().any(|u| matches!(u, ClientUpdate::Canvas { version: 1, .. })));
    }

    #[tokio::test]
    async fn test_viewer_cannot_draw() {
        let h = harness();
        let room = h.playing_room(&["a", "b"]).await;
        let (mut b, mut b_rx) = attach(&h, &room, "b").await;

        b.handle(Command::Draw(stroke())).await;
        assert!(b.canvas().document().is_empty());
        assert!(drain(&mut b_rx).iter().any(|u| matches!(u, ClientUpdate::Error(_))));
    }

    #[tokio::test]
    async fn test_deadline_passes_turn_and_flushes() {
        let h = harness();
        let room = h.playing_room(&["a", "b"]).await;
        let (mut a, _a_rx) = attach(&h, &room, "a").await;

        a.handle(Command::Draw(stroke())).await;
        h.clock.advance(Duration::seconds(180));
        a.tick().await;

        assert_eq!(h.holder(room.id).await, Some(id("b")));
        assert_eq!(h.coordinator.load_canvas(room.id).await.unwrap().version, 1);
        assert!(!a.is_drawer());
        assert_eq!(a.view().room.current_round, 1);
    }

    #[tokio::test]
    async fn test_countdown_from_deadline() {
        let h = harness();
        let room = h.playing_room(&["a", "b"]).await;
        let (mut b, mut b_rx) = attach(&h, &room, "b").await;

        h.clock.advance(Duration::milliseconds(60_500));
        b.tick().await;
        b.tick().await;
        let countdowns: Vec<_> = drain(&mut b_rx)
            .into_iter()
            .filter_map(|u| match u {
                ClientUpdate::Countdown { seconds_left, .. } => Some(seconds_left),
                _ => None,
            })
            .collect();
        assert_eq!(countdowns, vec![120]);
    }

    #[tokio::test]
    async fn test_stalled_turn_expired_by_viewer() {
        let h = harness();
        let room = h.playing_room(&["a", "b", "c"]).await;
        let (mut c, _c_rx) = attach(&h, &room, "c").await;

        h.clock.advance(Duration::seconds(180));
        c.tick().await;
        assert_eq!(h.holder(room.id).await, Some(id("a")));

        h.clock.advance(Duration::seconds(STALL_GRACE_SECS));
        c.tick().await;
        assert_eq!(h.holder(room.id).await, Some(id("b")));
    }

    #[tokio::test]
    async fn test_new_drawer_sees_fresh_deadline() {
        let (h, store) = flaky_harness();
        let room = h.playing_room(&["a", "b", "c"]).await;
        let (mut b, _b_rx) = attach(&h, &room, "b").await;
        h.clock.advance(Duration::seconds(180));

        // Hold the rotation between clearing a's flag and advancing the room.
        let gate = store.gate(Write::Room);
        let coordinator = h.coordinator.clone();
        let room_id = room.id;
        let pass = tokio::spawn(async move {
            let a = id("a");
            coordinator.pass_turn(room_id, &a).await
        });
        gate.held(1).await;
        b.drain_changes().await;
        b.tick().await;
        gate.open();

        let outcome = pass.await.unwrap().unwrap();
        assert_eq!(outcome, RotationOutcome::Rotated { holder: id("b"), round: 1 });
        assert_eq!(h.flagged(room.id).await, vec![id("b")]);

        b.drain_changes().await;
        assert!(b.is_drawer());
        b.tick().await;
        assert_eq!(h.holder(room.id).await, Some(id("b")));
        assert_eq!(b.view().room.seconds_left(h.clock.now()), Some(180));
    }

    #[tokio::test]
    async fn test_inherited_deadline_waits_for_grace() {
        let h = harness();
        let room = h.playing_room(&["a", "b"]).await;
        let (mut b, _b_rx) = attach(&h, &room, "b").await;
        h.clock.advance(Duration::seconds(180));

        // The turn lands on b with the old deadline already gone.
        for mut player in h.players(room.id).await {
            player.is_current_turn = player.identity == id("b");
            h.coordinator.store.update_player(&player).await.unwrap();
        }
        b.drain_changes().await;
        assert!(b.is_drawer());
        b.tick().await;
        assert_eq!(h.holder(room.id).await, Some(id("b")));

        h.clock.advance(Duration::seconds(STALL_GRACE_SECS));
        b.tick().await;
        assert_eq!(h.holder(room.id).await, Some(id("a")));
    }

    #[tokio::test]
    async fn test_next_drawer_builds_on_previous_drawing() {
        let h = harness();
        let room = h.playing_room(&["a", "b"]).await;
        let (mut a, _a_rx) = attach(&h, &room, "a").await;
        let (mut b, _b_rx) = attach(&h, &room, "b").await;

        a.handle(Command::Draw(stroke())).await;
        h.clock.advance(Duration::milliseconds(1000));
        a.tick().await;
        a.handle(Command::PassTurn).await;

        // b fell behind and never saw a's save.
        b.on_delivery(Delivery::Missed(4)).await;
        assert!(b.is_drawer());
        assert_eq!(b.canvas().version(), 1);
        assert_eq!(b.canvas().document().len(), 1);

        b.handle(Command::Draw(stroke())).await;
        h.clock.advance(Duration::milliseconds(1000));
        b.tick().await;

        let stored = h.coordinator.load_canvas(room.id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(CanvasDocument::from_bytes(&stored.data).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_late_save_is_rebased_onto() {
        let (h, store) = flaky_harness();
        let room = h.playing_room(&["a", "b"]).await;

        let mut drawing = CanvasDocument::new();
        drawing.add_stroke(stroke());
        let data = drawing.to_bytes().unwrap();

        // a's last save is still in flight when its turn ends.
        let gate = store.gate(Write::Canvas);
        let coordinator = h.coordinator.clone();
        let room_id = room.id;
        let save = tokio::spawn(async move {
            let a = id("a");
            coordinator.save_canvas(room_id, &a, 1, data).await
        });
        gate.held(1).await;
        h.coordinator.pass_turn(room.id, &id("a")).await.unwrap();
        let (mut b, mut b_rx) = attach(&h, &room, "b").await;
        assert_eq!(b.canvas().version(), 0);
        gate.open();
        save.await.unwrap().unwrap();

        b.handle(Command::Draw(stroke())).await;
        h.clock.advance(Duration::milliseconds(1000));
        b.tick().await;
        assert_eq!(b.canvas().version(), 1);
        assert_eq!(b.canvas().document().len(), 2);
        assert!(b.canvas().is_dirty());
        assert!(drain(&mut b_rx).iter().any(|u| matches!(u, ClientUpdate::Canvas { version: 1, .. })));

        h.clock.advance(Duration::milliseconds(1000));
        b.tick().await;
        let stored = h.coordinator.load_canvas(room.id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(CanvasDocument::from_bytes(&stored.data).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_topic_pick_timeout_from_any_client() {
        let h = harness();
        let room = h.room_with(&["a", "b"]).await;
        h.coordinator.start_game(room.id, &id("a")).await.unwrap();
        let (mut b, _b_rx) = attach(&h, &room, "b").await;

        h.clock.advance(Duration::seconds(30));
        b.tick().await;
        assert_eq!(b.view().room.phase, Phase::Playing);
        assert_eq!(h.holder(room.id).await, Some(id("a")));
    }

    #[tokio::test]
    async fn test_rotation_cooldown() {
        let (h, store) = flaky_harness();
        let room = h.playing_room(&["a", "b"]).await;
        let (mut a, mut a_rx) = attach(&h, &room, "a").await;

        store.fail_flag_for(Some(id("b")));
        a.handle(Command::PassTurn).await;
        assert!(drain(&mut a_rx).iter().any(|u| matches!(u, ClientUpdate::Error(_))));
        let writes = store.player_writes.load(Ordering::SeqCst);

        a.handle(Command::PassTurn).await;
        assert_eq!(store.player_writes.load(Ordering::SeqCst), writes);

        store.fail_flag_for(None);
        h.clock.advance(Duration::seconds(2));
        a.handle(Command::PassTurn).await;
        assert_eq!(h.holder(room.id).await, Some(id("b")));
    }

    #[tokio::test]
    async fn test_chat_echo_is_deduplicated() {
        let h = harness();
        let room = h.room_with(&["a", "b"]).await;
        let (mut a, mut a_rx) = attach(&h, &room, "a").await;

        a.handle(Command::Chat("hello".into())).await;
        a.drain_changes().await;
        let message = a.view().messages.last().cloned().unwrap();
        a.on_delivery(Delivery::Event(crate::bus::ChangeEvent::new(
            room.id,
            crate::bus::ChangeKind::Insert,
            ChangePayload::Message(message),
        )))
        .await;

        let echoes = drain(&mut a_rx)
            .into_iter()
            .filter(|u| matches!(u, ClientUpdate::Message(_)))
            .count();
        assert_eq!(echoes, 1);
        assert_eq!(a.view().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_missed_changes_trigger_resync() {
        let h = harness();
        let room = h.room_with(&["a", "b"]).await;
        let (mut a, _a_rx) = attach(&h, &room, "a").await;

        h.coordinator.send_message(room.id, &id("b"), "while you were away").await.unwrap();
        h.coordinator.join(&room.code, &id("c"), false).await.unwrap();
        a.on_delivery(Delivery::Missed(12)).await;

        assert_eq!(a.view().messages.len(), 1);
        assert!(a.view().roster.contains(&id("c")));
    }

    #[tokio::test]
    async fn test_drawer_leaving_hands_on_turn() {
        let h = harness();
        let room = h.playing_room(&["a", "b"]).await;
        let (mut a, _a_rx) = attach(&h, &room, "a").await;

        let token = a.cancel_token();
        assert!(!a.handle(Command::Leave).await);
        assert!(token.is_cancelled());
        assert_eq!(h.holder(room.id).await, Some(id("b")));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness();
        let room = h.room_with(&["a"]).await;
        let (a, mut a_rx) = attach(&h, &room, "a").await;
        let (_commands_tx, commands_rx) = mpsc::channel(8);

        let token = a.cancel_token();
        let handle = tokio::spawn(a.run(commands_rx));
        assert!(matches!(a_rx.recv().await, Some(ClientUpdate::Room(_))));

        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
