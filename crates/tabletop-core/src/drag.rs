//! Single and multi-object drag sessions.
//!
//! Lifecycle: idle → prepared (pointer-down on an object) → dragging (slop
//! exceeded) → idle (pointer-up, cancel). Positions are always recomputed
//! from the session's start snapshot plus the total pointer delta, never
//! accumulated per move, so many small moves cannot drift.

use std::collections::HashMap;

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::object::{ObjectId, ObjectMirror, Pose};
use crate::registry::KindRegistry;
use crate::selection::SelectionManager;
use crate::sort_key::keys_above;
use crate::spatial::SpatialIndex;

/// Pose of a secondary dragged object relative to the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryOffset {
    pub id: ObjectId,
    pub dx: f64,
    pub dy: f64,
    /// Rotation difference in degrees.
    pub rotation: f64,
}

/// Awareness payload describing an in-flight drag.
///
/// Carries the primary's absolute pose plus relative offsets so a receiver
/// can rebuild the whole group from the latest packet alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragBroadcast {
    pub gesture_id: String,
    pub primary_id: ObjectId,
    pub primary: Pose,
    #[serde(default)]
    pub secondary: Vec<SecondaryOffset>,
}

impl DragBroadcast {
    /// Every object id the drag covers, primary first.
    pub fn object_ids(&self) -> impl Iterator<Item = &ObjectId> {
        std::iter::once(&self.primary_id).chain(self.secondary.iter().map(|s| &s.id))
    }

    /// Absolute pose of every covered object.
    pub fn absolute_poses(&self) -> Vec<(ObjectId, Pose)> {
        let mut poses = vec![(self.primary_id.clone(), self.primary)];
        poses.extend(self.secondary.iter().map(|s| {
            (
                s.id.clone(),
                Pose::new(self.primary.x + s.dx, self.primary.y + s.dy, self.primary.rotation + s.rotation),
            )
        }));
        poses
    }

    pub fn is_finite(&self) -> bool {
        self.primary.is_finite()
            && self
                .secondary
                .iter()
                .all(|s| s.dx.is_finite() && s.dy.is_finite() && s.rotation.is_finite())
    }
}

/// Final pose of a moved object, ready to commit to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovedObject {
    pub id: ObjectId,
    pub pose: Pose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

/// How starting a drag changes the local selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEffect {
    /// The candidate was already selected; the selection moves as a group.
    Keep,
    /// The candidate joins the existing selection.
    Add,
    /// The candidate becomes the only selected object.
    Replace,
}

/// Outcome of [`DragManager::start_object_drag`].
#[derive(Debug, Clone, PartialEq)]
pub struct DragStart {
    pub gesture_id: String,
    pub primary: ObjectId,
    /// Dragged ids, back to front.
    pub ids: Vec<ObjectId>,
    pub selection: SelectionEffect,
    pub unstack: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct DragCandidate {
    id: ObjectId,
    world: Point,
    multi_select: bool,
    unstack: bool,
}

/// State of an active drag.
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    pub gesture_id: String,
    pub primary: ObjectId,
    pub start_world: Point,
    pub current_world: Point,
    /// Dragged ids, back to front.
    pub order: Vec<ObjectId>,
    snapshots: HashMap<ObjectId, Pose>,
    original_keys: HashMap<ObjectId, String>,
    new_keys: HashMap<ObjectId, String>,
    pub unstack: bool,
}

impl DragSession {
    pub fn delta(&self) -> Vec2 {
        self.current_world - self.start_world
    }

    pub fn snapshot(&self, id: &ObjectId) -> Option<Pose> {
        self.snapshots.get(id).copied()
    }

    /// Live pose of a dragged object: snapshot plus total delta.
    pub fn live_pose(&self, id: &ObjectId) -> Option<Pose> {
        self.snapshots.get(id).map(|p| p.translated(self.delta()))
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.snapshots.contains_key(id)
    }

    /// Sort key assigned by the z-order bump.
    pub fn new_key(&self, id: &ObjectId) -> Option<&str> {
        self.new_keys.get(id).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
enum Phase {
    #[default]
    Idle,
    Prepared(DragCandidate),
    Dragging(DragSession),
}

/// Owns at most one drag session at a time.
#[derive(Debug, Clone, Default)]
pub struct DragManager {
    phase: Phase,
}

impl DragManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the object under pointer-down without starting a drag.
    pub fn prepare_object_drag(&mut self, id: ObjectId, world: Point, multi_select: bool, unstack: bool) {
        if matches!(self.phase, Phase::Dragging(_)) {
            log::debug!("Ignoring drag candidate {id}: a drag is already active");
            return;
        }
        self.phase = Phase::Prepared(DragCandidate {
            id,
            world,
            multi_select,
            unstack,
        });
    }

    /// Id of the prepared candidate, if any.
    pub fn prepared_id(&self) -> Option<&ObjectId> {
        match &self.phase {
            Phase::Prepared(candidate) => Some(&candidate.id),
            _ => None,
        }
    }

    /// Drop the prepared candidate. An active session is left alone.
    pub fn clear_prepared(&mut self) -> Option<ObjectId> {
        if !self.is_prepared() {
            return None;
        }
        match std::mem::take(&mut self.phase) {
            Phase::Prepared(candidate) => Some(candidate.id),
            _ => None,
        }
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self.phase, Phase::Prepared(_))
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, Phase::Dragging(_))
    }

    pub fn session(&self) -> Option<&DragSession> {
        match &self.phase {
            Phase::Dragging(session) => Some(session),
            _ => None,
        }
    }

    /// Dragged ids, empty when idle.
    pub fn dragged_ids(&self) -> Vec<ObjectId> {
        self.session().map(|s| s.order.clone()).unwrap_or_default()
    }

    /// Live pose of a dragged object.
    pub fn live_pose(&self, id: &ObjectId) -> Option<Pose> {
        self.session().and_then(|s| s.live_pose(id))
    }

    /// Promote the prepared candidate into a drag session.
    ///
    /// Picks the dragged set from the selection, snapshots start poses, and
    /// brings the set to the front with fresh sort keys written to the mirror.
    pub fn start_object_drag(&mut self, mirror: &mut ObjectMirror, selection: &SelectionManager) -> EngineResult<DragStart> {
        let candidate = match std::mem::take(&mut self.phase) {
            Phase::Prepared(candidate) => candidate,
            other => {
                self.phase = other;
                return Err(EngineError::NoActiveDrag);
            }
        };
        if !mirror.contains(&candidate.id) {
            return Err(EngineError::UnknownObject(candidate.id));
        }

        let (mut ids, effect) = if selection.is_selected(&candidate.id) {
            (selection.selected_ids(), SelectionEffect::Keep)
        } else if candidate.multi_select {
            let mut ids = selection.selected_ids();
            ids.push(candidate.id.clone());
            (ids, SelectionEffect::Add)
        } else {
            (vec![candidate.id.clone()], SelectionEffect::Replace)
        };
        ids.retain(|id| mirror.get(id).is_some_and(|o| !o.locked || *id == candidate.id));
        let order = mirror.order_by_sort_key(&ids);

        let mut snapshots = HashMap::with_capacity(order.len());
        let mut original_keys = HashMap::with_capacity(order.len());
        for id in &order {
            if let Some(object) = mirror.get(id) {
                snapshots.insert(id.clone(), object.position);
                original_keys.insert(id.clone(), object.sort_key.clone());
            }
        }

        let keys = keys_above(mirror.max_sort_key(), order.len());
        let mut new_keys = HashMap::with_capacity(order.len());
        for (id, key) in order.iter().zip(keys) {
            if let Some(object) = mirror.get_mut(id) {
                object.sort_key = key.clone();
            }
            new_keys.insert(id.clone(), key);
        }

        let session = DragSession {
            gesture_id: Uuid::new_v4().to_string(),
            primary: candidate.id.clone(),
            start_world: candidate.world,
            current_world: candidate.world,
            order: order.clone(),
            snapshots,
            original_keys,
            new_keys,
            unstack: candidate.unstack,
        };
        log::debug!(
            "Drag {} started on {} ({} objects)",
            session.gesture_id,
            session.primary,
            order.len()
        );
        let start = DragStart {
            gesture_id: session.gesture_id.clone(),
            primary: session.primary.clone(),
            ids: order,
            selection: effect,
            unstack: session.unstack,
        };
        self.phase = Phase::Dragging(session);
        Ok(start)
    }

    /// Move every dragged object to snapshot + (world - start) in the mirror.
    ///
    /// The spatial index is left untouched until the drag ends.
    pub fn update_drag_positions(&mut self, world: Point, mirror: &mut ObjectMirror) -> EngineResult<Vec<(ObjectId, Pose)>> {
        let Phase::Dragging(session) = &mut self.phase else {
            return Err(EngineError::NoActiveDrag);
        };
        if !world.x.is_finite() || !world.y.is_finite() {
            return Err(EngineError::InvalidNumber {
                what: "drag.world",
                value: if world.x.is_finite() { world.y } else { world.x },
            });
        }
        session.current_world = world;

        let mut moved = Vec::with_capacity(session.order.len());
        for id in &session.order {
            let Some(pose) = session.live_pose(id) else {
                continue;
            };
            match mirror.get_mut(id) {
                Some(object) => {
                    object.position = pose;
                    moved.push((id.clone(), pose));
                }
                None => log::debug!("Dragged object {id} missing from mirror"),
            }
        }
        Ok(moved)
    }

    /// Awareness payload for the current drag.
    pub fn get_drag_state_update(&self) -> Option<DragBroadcast> {
        let session = self.session()?;
        let primary = session.live_pose(&session.primary)?;
        let secondary = session
            .order
            .iter()
            .filter(|id| **id != session.primary)
            .filter_map(|id| {
                session.live_pose(id).map(|pose| SecondaryOffset {
                    id: id.clone(),
                    dx: pose.x - primary.x,
                    dy: pose.y - primary.y,
                    rotation: pose.rotation - primary.rotation,
                })
            })
            .collect();
        Some(DragBroadcast {
            gesture_id: session.gesture_id.clone(),
            primary_id: session.primary.clone(),
            primary,
            secondary,
        })
    }

    /// Finish the drag: write final poses, update the spatial index once,
    /// and return the poses to commit.
    ///
    /// `adjust` may replace each final pose (grid snapping).
    pub fn end_object_drag(
        &mut self,
        mirror: &mut ObjectMirror,
        index: &mut SpatialIndex,
        registry: &KindRegistry,
        adjust: impl Fn(Pose) -> Pose,
    ) -> EngineResult<Vec<MovedObject>> {
        let Phase::Dragging(session) = std::mem::take(&mut self.phase) else {
            return Err(EngineError::NoActiveDrag);
        };

        let mut moved = Vec::with_capacity(session.order.len());
        for id in &session.order {
            let Some(live) = session.live_pose(id) else {
                continue;
            };
            let Some(object) = mirror.get_mut(id) else {
                log::debug!("Dropped object {id} vanished before drag end");
                continue;
            };
            let pose = adjust(live);
            object.position = pose;
            index.insert(id.clone(), registry.bounds(object), object.sort_key.clone());
            moved.push(MovedObject {
                id: id.clone(),
                pose,
                sort_key: session.new_keys.get(id).cloned(),
            });
        }
        log::debug!("Drag {} ended, {} objects moved", session.gesture_id, moved.len());
        Ok(moved)
    }

    /// Abandon the drag, restoring snapshot poses and sort keys in the mirror.
    pub fn cancel_object_drag(&mut self, mirror: &mut ObjectMirror) {
        match std::mem::take(&mut self.phase) {
            Phase::Dragging(session) => {
                for id in &session.order {
                    if let Some(object) = mirror.get_mut(id) {
                        if let Some(pose) = session.snapshots.get(id) {
                            object.position = *pose;
                        }
                        if let Some(key) = session.original_keys.get(id) {
                            object.sort_key = key.clone();
                        }
                    }
                }
                log::debug!("Drag {} cancelled", session.gesture_id);
            }
            Phase::Prepared(_) | Phase::Idle => {}
        }
    }

    /// Drop an object that disappeared from the store mid-drag.
    ///
    /// Returns false if the session ended because nothing is left to drag.
    pub fn forget_object(&mut self, id: &ObjectId) -> bool {
        match &mut self.phase {
            Phase::Dragging(session) => {
                session.order.retain(|o| o != id);
                session.snapshots.remove(id);
                session.new_keys.remove(id);
                session.original_keys.remove(id);
                if session.order.is_empty() {
                    self.phase = Phase::Idle;
                    return false;
                }
                if session.primary == *id {
                    session.primary = session.order[session.order.len() - 1].clone();
                }
                true
            }
            Phase::Prepared(candidate) if candidate.id == *id => {
                self.phase = Phase::Idle;
                true
            }
            _ => true,
        }
    }
}
