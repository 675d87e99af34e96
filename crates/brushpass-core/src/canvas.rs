//! The shared drawing surface.
//!
//! [`CanvasDocument`] is the local stroke list with undo/redo. [`CanvasSync`]
//! wraps it with the versioning and debounced persistence a room client
//! needs: the current drawer saves full snapshots with increasing versions,
//! everyone else only ever applies snapshots newer than what they show.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::{GameError, GameResult};
use crate::model::{CanvasSnapshot, Identity, Phase, RoomId};
use crate::store::StoreError;

/// Maximum number of undo states to keep.
pub const MAX_UNDO_HISTORY: usize = 50;

/// Drawing tool a stroke was made with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    #[default]
    Pencil,
    Eraser,
}

/// One continuous pen movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub tool: Tool,
    /// CSS color, e.g. `#1e1e1e`.
    pub color: String,
    pub width: f32,
    pub points: Vec<[f32; 2]>,
}

impl Stroke {
    pub fn new(tool: Tool, color: impl Into<String>, width: f32, points: Vec<[f32; 2]>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool,
            color: color.into(),
            width,
            points,
        }
    }
}

/// A drawing as an ordered list of strokes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanvasDocument {
    pub strokes: Vec<Stroke>,
    #[serde(skip)]
    undo_stack: Vec<Vec<Stroke>>,
    #[serde(skip)]
    redo_stack: Vec<Vec<Stroke>>,
}

impl PartialEq for CanvasDocument {
    fn eq(&self, other: &Self) -> bool {
        self.strokes == other.strokes
    }
}

impl CanvasDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push current state to undo stack (call before making changes).
    fn push_undo(&mut self) {
        self.undo_stack.push(self.strokes.clone());
        self.redo_stack.clear();
        if self.undo_stack.len() > MAX_UNDO_HISTORY {
            self.undo_stack.remove(0);
        }
    }

    /// Returns true if undo was performed, false if nothing to undo.
    pub fn undo(&mut self) -> bool {
        match self.undo_stack.pop() {
            Some(previous) => {
                let current = std::mem::replace(&mut self.strokes, previous);
                self.redo_stack.push(current);
                true
            }
            None => false,
        }
    }

    /// Returns true if redo was performed, false if nothing to redo.
    pub fn redo(&mut self) -> bool {
        match self.redo_stack.pop() {
            Some(next) => {
                let current = std::mem::replace(&mut self.strokes, next);
                self.undo_stack.push(current);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Add a stroke. Strokes without points are dropped.
    pub fn add_stroke(&mut self, stroke: Stroke) -> bool {
        if stroke.points.is_empty() {
            return false;
        }
        self.push_undo();
        self.strokes.push(stroke);
        true
    }

    /// Wipe the drawing. Undoable.
    pub fn clear(&mut self) -> bool {
        if self.strokes.is_empty() {
            return false;
        }
        self.push_undo();
        self.strokes.clear();
        true
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    fn stroke_ids(&self) -> HashSet<Uuid> {
        self.strokes.iter().map(|s| s.id).collect()
    }

    /// Encode for a [`CanvasSnapshot`]. History is not included.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode snapshot data. Empty data is the blank canvas.
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        if data.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(data)
    }
}

/// A client's view of the room canvas.
#[derive(Debug, Clone)]
pub struct CanvasSync {
    document: CanvasDocument,
    /// Version the local document is based on.
    version: u64,
    /// Strokes of that version.
    base: HashSet<Uuid>,
    debounce: Duration,
    /// Local edits are persisted once the clock passes this point.
    flush_at: Option<DateTime<Utc>>,
    /// The last save attempt failed; local edits may not have reached others.
    unconfirmed: bool,
}

impl CanvasSync {
    pub fn new(debounce: Duration) -> Self {
        Self {
            document: CanvasDocument::new(),
            version: 0,
            base: HashSet::new(),
            debounce,
            flush_at: None,
            unconfirmed: false,
        }
    }

    pub fn document(&self) -> &CanvasDocument {
        &self.document
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.flush_at.is_some()
    }

    pub fn is_unconfirmed(&self) -> bool {
        self.unconfirmed
    }

    /// Replace the local state with `snapshot`, dropping pending edits.
    pub fn load(&mut self, snapshot: &CanvasSnapshot) {
        self.document = decode(snapshot);
        self.base = self.document.stroke_ids();
        self.version = snapshot.version;
        self.flush_at = None;
        self.unconfirmed = false;
    }

    /// Load `snapshot` if it is newer and nothing local is waiting to be saved.
    pub fn catch_up(&mut self, snapshot: &CanvasSnapshot) -> bool {
        if self.is_dirty() || snapshot.version <= self.version {
            return false;
        }
        self.load(snapshot);
        true
    }

    /// Move pending edits on top of a newer stored snapshot. Strokes drawn
    /// since the last sync are appended to it and strokes erased since then
    /// are erased from it. Undo history does not survive a rebase.
    pub fn rebase(&mut self, latest: &CanvasSnapshot, now: DateTime<Utc>) {
        let theirs = decode(latest);
        let known = theirs.stroke_ids();
        let erased: HashSet<Uuid> = self.base.difference(&self.document.stroke_ids()).copied().collect();

        let mut strokes: Vec<Stroke> = theirs
            .strokes
            .into_iter()
            .filter(|s| !erased.contains(&s.id))
            .collect();
        strokes.extend(
            self.document
                .strokes
                .iter()
                .filter(|s| !self.base.contains(&s.id) && !known.contains(&s.id))
                .cloned(),
        );

        log::debug!(
            "rebased {} local strokes onto canvas v{} of room {}",
            strokes.len(),
            latest.version,
            latest.room_id
        );
        self.document = CanvasDocument {
            strokes,
            ..CanvasDocument::default()
        };
        self.base = known;
        self.version = latest.version;
        self.unconfirmed = true;
        self.flush_at = Some(now + self.debounce);
    }

    /// Apply a snapshot from another client. The drawer never applies remote
    /// snapshots, and nobody applies one that is not newer than their own.
    pub fn apply_remote(&mut self, snapshot: &CanvasSnapshot, is_drawer: bool) -> bool {
        if is_drawer || snapshot.version <= self.version {
            return false;
        }
        self.load(snapshot);
        true
    }

    pub fn draw(&mut self, stroke: Stroke, now: DateTime<Utc>) -> bool {
        let changed = self.document.add_stroke(stroke);
        self.touch(changed, now)
    }

    pub fn undo(&mut self, now: DateTime<Utc>) -> bool {
        let changed = self.document.undo();
        self.touch(changed, now)
    }

    pub fn redo(&mut self, now: DateTime<Utc>) -> bool {
        let changed = self.document.redo();
        self.touch(changed, now)
    }

    pub fn clear(&mut self, now: DateTime<Utc>) -> bool {
        let changed = self.document.clear();
        self.touch(changed, now)
    }

    /// Each edit pushes the save back by the debounce interval.
    fn touch(&mut self, changed: bool, now: DateTime<Utc>) -> bool {
        if changed {
            self.flush_at = Some(now + self.debounce);
        }
        changed
    }

    /// Whether pending edits should be saved at `now`.
    pub fn flush_due(&self, now: DateTime<Utc>) -> bool {
        self.flush_at.is_some_and(|at| at <= now)
    }

    /// Version and encoded data for the next save.
    pub fn pending(&self) -> GameResult<(u64, Vec<u8>)> {
        let data = self
            .document
            .to_bytes()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok((self.version + 1, data))
    }

    /// A save of `version` went through.
    pub fn confirm(&mut self, version: u64) {
        self.version = self.version.max(version);
        self.base = self.document.stroke_ids();
        self.flush_at = None;
        self.unconfirmed = false;
    }

    /// A save failed; keep the edits and try again after another interval.
    pub fn fail(&mut self, now: DateTime<Utc>) {
        self.unconfirmed = true;
        self.flush_at = Some(now + self.debounce);
    }
}

/// Undecodable data shows as a blank canvas.
fn decode(snapshot: &CanvasSnapshot) -> CanvasDocument {
    CanvasDocument::from_bytes(&snapshot.data).unwrap_or_else(|e| {
        log::warn!("canvas v{} of room {} is unreadable: {}", snapshot.version, snapshot.room_id, e);
        CanvasDocument::new()
    })
}

impl Coordinator {
    /// The room's latest canvas snapshot.
    pub async fn load_canvas(&self, room_id: RoomId) -> GameResult<CanvasSnapshot> {
        Ok(self.store.canvas(room_id).await?)
    }

    /// Persist a canvas snapshot. Only the current turn holder may save, and
    /// only versions newer than the stored one are accepted.
    ///
    /// The holder check and the write are separate steps, so a save can land
    /// just after the turn moved on. The next drawer then finds a newer
    /// version than it started from and rebases onto it.
    pub async fn save_canvas(
        &self,
        room_id: RoomId,
        acting: &Identity,
        version: u64,
        data: Vec<u8>,
    ) -> GameResult<CanvasSnapshot> {
        let (room, roster) = self.room_state(room_id).await?;
        if room.phase != Phase::Playing {
            return Err(GameError::WrongPhase(room.phase));
        }
        if roster.holder().map(|p| &p.identity) != Some(acting) {
            return Err(GameError::Unauthorized("only the current drawer can draw"));
        }

        let snapshot = CanvasSnapshot {
            room_id,
            version,
            author: Some(acting.clone()),
            data,
            saved_at: self.clock.now(),
        };
        self.store.put_canvas(&snapshot).await?;
        log::debug!("room {} canvas v{} saved by {}", room.code, version, acting);

        let holder = self.roster(room_id).await?.holder().map(|p| p.identity.clone());
        if holder.as_ref() != Some(acting) {
            log::info!("room {} canvas v{} from {} landed after the turn moved on", room.code, version, acting);
        }
        Ok(snapshot)
    }
}
