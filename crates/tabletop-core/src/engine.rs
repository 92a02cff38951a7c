//! The orchestrator.
//!
//! Owns every manager, the object mirror, the spatial index, and the scene.
//! Inbound messages are handled to completion one at a time; handlers never
//! return errors to the host, they log and recover.

use std::collections::HashSet;
use std::time::Duration;

use kurbo::{Point, Size};

use crate::Instant;
use crate::awareness::{AwarenessManager, AwarenessUpdate};
use crate::camera::CameraManager;
use crate::config::EngineConfig;
use crate::drag::{DragManager, SelectionEffect};
use crate::gesture::{GestureRecognizer, Modifiers, PointerId};
use crate::grid_snap::GridSnapManager;
use crate::marquee::{InteractionMode, SelectionRectangleManager, marquee_allowed};
use crate::messages::{InboundMessage, OutboundMessage, PointerInput, ScreenRect};
use crate::object::{ObjectId, ObjectKind, ObjectMirror, Pose, SpatialObject};
use crate::registry::KindRegistry;
use crate::scene::{DisplayItem, MarqueeVisual, SELECTION_COLOR, Scene, VisualState};
use crate::selection::SelectionManager;
use crate::spatial::SpatialIndex;
use crate::transport::ResponseSink;

/// What a pointer-down landed on, decided before slop is cleared.
#[derive(Debug, Clone, PartialEq)]
enum PendingTarget {
    Object(ObjectId),
    Marquee,
    Pan,
}

/// The single gesture in flight.
#[derive(Debug, Clone, PartialEq)]
enum Gesture {
    Idle,
    /// Pointer is down but has not moved past slop.
    Pending {
        pointer_id: PointerId,
        target: PendingTarget,
        /// Modifier state at pointer-down.
        modifiers: Modifiers,
    },
    Panning {
        pointer_id: PointerId,
        last: Point,
    },
    Dragging {
        pointer_id: PointerId,
    },
    Marquee {
        pointer_id: PointerId,
    },
    Pinching {
        pair: [PointerId; 2],
        initial_distance: f64,
    },
}

/// A request answered once a condition holds or the frame ceiling is hit.
#[derive(Debug, Clone)]
enum PendingPoll {
    Flush {
        request_id: u64,
        frames: u32,
    },
    ScreenCoords {
        request_id: u64,
        ids: Vec<ObjectId>,
        frames: u32,
    },
}

/// One interaction engine instance.
pub struct Engine<'r, S: ResponseSink> {
    config: EngineConfig,
    registry: &'r KindRegistry,
    sink: S,
    gestures: GestureRecognizer,
    camera: CameraManager,
    drag: DragManager,
    selection: SelectionManager,
    marquee: SelectionRectangleManager,
    grid_snap: GridSnapManager,
    awareness: AwarenessManager,
    mirror: ObjectMirror,
    index: SpatialIndex,
    scene: Scene,
    mode: InteractionMode,
    gesture: Gesture,
    hover: Option<ObjectId>,
    remote_hovers: HashSet<ObjectId>,
    zoom_active: bool,
    last_zoom_at: Option<Instant>,
    polls: Vec<PendingPoll>,
    viewport: Size,
}

impl<'r, S: ResponseSink> Engine<'r, S> {
    pub fn new(config: EngineConfig, registry: &'r KindRegistry, sink: S) -> Self {
        Self {
            gestures: GestureRecognizer::new(config.slop),
            camera: CameraManager::new(&config),
            drag: DragManager::new(),
            selection: SelectionManager::new(config.actor_id.clone()),
            marquee: SelectionRectangleManager::new(),
            grid_snap: GridSnapManager::new(config.grid_size, config.snap_ghost_alpha),
            awareness: AwarenessManager::new(&config),
            mirror: ObjectMirror::new(),
            index: SpatialIndex::new(config.spatial_cell_size),
            scene: Scene::new(),
            mode: InteractionMode::default(),
            gesture: Gesture::Idle,
            hover: None,
            remote_hovers: HashSet::new(),
            zoom_active: false,
            last_zoom_at: None,
            polls: Vec::new(),
            viewport: Size::ZERO,
            config,
            registry,
            sink,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn camera(&self) -> &CameraManager {
        &self.camera
    }

    pub fn selection(&self) -> &SelectionManager {
        &self.selection
    }

    pub fn mirror(&self) -> &ObjectMirror {
        &self.mirror
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn drag(&self) -> &DragManager {
        &self.drag
    }

    pub fn grid_snap(&self) -> &GridSnapManager {
        &self.grid_snap
    }

    pub fn awareness(&self) -> &AwarenessManager {
        &self.awareness
    }

    pub fn interaction_mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn hovered(&self) -> Option<&ObjectId> {
        self.hover.as_ref()
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Whether a debounce or bounded poll is still waiting on `tick`.
    pub fn has_pending_work(&self) -> bool {
        self.zoom_active || !self.polls.is_empty()
    }

    /// Drain the redraw flag raised by any visual change.
    pub fn take_redraw_request(&mut self) -> bool {
        self.scene.take_redraw_request()
    }

    /// Everything the renderer should draw this frame, back to front, in
    /// world coordinates.
    pub fn display_list(&self) -> Vec<DisplayItem<'_>> {
        let mut items: Vec<DisplayItem<'_>> = self
            .scene
            .visible_objects()
            .into_iter()
            .map(DisplayItem::Object)
            .collect();
        items.extend(self.grid_snap.ghosts().map(DisplayItem::Ghost));
        items.extend(self.awareness.ghosts().map(DisplayItem::Ghost));
        items.extend(self.awareness.lassos().map(DisplayItem::Marquee));
        items.extend(self.scene.marquee().map(DisplayItem::Marquee));
        items.extend(self.awareness.cursors().map(DisplayItem::Cursor));
        items
    }

    /// Handle one inbound message to completion.
    pub fn handle_message(&mut self, message: InboundMessage, now: Instant) {
        match message {
            InboundMessage::PointerDown(input) => {
                if Self::valid_pointer(&input) {
                    self.on_pointer_down(input, now);
                }
            }
            InboundMessage::PointerMove(input) => {
                if Self::valid_pointer(&input) {
                    self.on_pointer_move(input, now);
                }
            }
            InboundMessage::PointerUp(input) => self.on_pointer_up(input, false, now),
            InboundMessage::PointerCancel(input) => self.on_pointer_up(input, true, now),
            InboundMessage::PointerLeave(input) => self.on_pointer_leave(input, now),
            InboundMessage::Wheel { delta_y, x, y } => self.on_wheel(delta_y, Point::new(x, y), now),
            InboundMessage::SetInteractionMode { mode } => {
                log::debug!("Interaction mode set to {mode:?}");
                self.mode = mode;
            }
            InboundMessage::SetGridSnapEnabled { enabled } => self.set_grid_snap_enabled(enabled),
            InboundMessage::ObjectsSync { objects } => self.on_objects_sync(objects),
            InboundMessage::ObjectsAdded { objects } => self.on_objects_added(objects),
            InboundMessage::ObjectsUpdated { objects } => self.on_objects_updated(objects),
            InboundMessage::ObjectsRemoved { ids } => self.on_objects_removed(&ids),
            InboundMessage::AwarenessUpdate { updates } => self.on_awareness(&updates, now),
            InboundMessage::RequestScreenCoords { request_id, ids } => self.on_request_screen_coords(request_id, ids),
            InboundMessage::Flush { request_id } => self.on_flush(request_id),
            InboundMessage::Resize {
                width,
                height,
                device_pixel_ratio,
            } => self.on_resize(width, height, device_pixel_ratio),
        }
    }

    /// Per-frame housekeeping: zoom-end debounce and bounded polls.
    pub fn tick(&mut self, now: Instant) {
        self.flush_zoom_debounce(now);
        self.advance_polls();
    }

    fn post(&mut self, message: OutboundMessage) {
        self.sink.post(message);
    }

    fn valid_pointer(input: &PointerInput) -> bool {
        let valid = input.x.is_finite() && input.y.is_finite();
        if !valid {
            log::warn!("Dropping pointer {} event with non-finite position", input.pointer_id);
        }
        valid
    }

    // Pointer input

    fn on_pointer_down(&mut self, input: PointerInput, now: Instant) {
        let position = input.position();
        self.gestures.add_pointer(input.pointer_id, input.pointer_type, position);

        if self.gestures.is_pinch_gesture() {
            self.start_pinch(now);
            return;
        }
        if self.gestures.get_pointer_count() > 1 || !matches!(self.gesture, Gesture::Idle) {
            log::debug!("Ignoring extra pointer {}", input.pointer_id);
            return;
        }

        let world = self.camera.screen_to_world(position);
        let multi = input.modifiers.multi_select();
        let target = match self.hit_test(world) {
            Some(id) => {
                let unstack = input.modifiers.alt && self.mirror.get(&id).is_some_and(|o| o.kind == ObjectKind::Stack);
                self.drag.prepare_object_drag(id.clone(), world, multi, unstack);
                PendingTarget::Object(id)
            }
            None if marquee_allowed(self.mode, multi) => {
                self.marquee.prepare_rectangle_select(world, multi);
                PendingTarget::Marquee
            }
            None => PendingTarget::Pan,
        };
        self.set_hover(None);
        self.gesture = Gesture::Pending {
            pointer_id: input.pointer_id,
            target,
            modifiers: input.modifiers,
        };
    }

    fn on_pointer_move(&mut self, input: PointerInput, now: Instant) {
        let position = input.position();
        let world = self.camera.screen_to_world(position);
        if input.is_primary {
            self.post(OutboundMessage::CursorPosition { x: world.x, y: world.y });
        }
        if self.gestures.update_pointer(input.pointer_id, position).is_none() {
            if matches!(self.gesture, Gesture::Idle) {
                let next = self.hit_test(world);
                self.set_hover(next);
            }
            return;
        }

        match self.gesture.clone() {
            Gesture::Pinching { pair, initial_distance } if pair.contains(&input.pointer_id) => {
                let Some(distance) = self.gestures.pinch_distance() else {
                    return;
                };
                if let Err(err) = self.camera.update_pinch(initial_distance, distance) {
                    log::warn!("Pinch frame skipped: {err}");
                    return;
                }
                self.zoom_activity(now);
                self.scene.request_redraw();
            }
            Gesture::Pending { pointer_id, target, .. } if pointer_id == input.pointer_id => {
                if self.gestures.exceeds_drag_slop(pointer_id) {
                    self.promote(pointer_id, target, position, world);
                }
            }
            Gesture::Panning { pointer_id, last } if pointer_id == input.pointer_id => {
                self.pan_to(pointer_id, last, position);
            }
            Gesture::Dragging { pointer_id } if pointer_id == input.pointer_id => self.drag_to(world),
            Gesture::Marquee { pointer_id } if pointer_id == input.pointer_id => {
                if let Some(rect) = self.marquee.update_rectangle(world) {
                    self.scene.set_marquee(Some(MarqueeVisual::new(rect, SELECTION_COLOR)));
                }
            }
            _ => {}
        }
    }

    /// Up and cancel share one path. Cancel skips click-to-select but still
    /// finalizes an object move.
    fn on_pointer_up(&mut self, input: PointerInput, cancelled: bool, now: Instant) {
        let Some(pointer) = self.gestures.remove_pointer(input.pointer_id) else {
            log::debug!("Pointer {} released without a matching down", input.pointer_id);
            return;
        };

        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Pinching { pair, .. } if pair.contains(&pointer.id) => self.collapse_pinch(now),
            Gesture::Pending {
                pointer_id,
                target,
                modifiers,
            } if pointer_id == pointer.id => {
                self.drag.clear_prepared();
                self.marquee.cancel();
                if !cancelled {
                    self.click(target, modifiers);
                }
            }
            Gesture::Panning { pointer_id, .. } if pointer_id == pointer.id => self.post(OutboundMessage::PanEnded),
            Gesture::Dragging { pointer_id } if pointer_id == pointer.id => self.finish_drag(),
            Gesture::Marquee { pointer_id } if pointer_id == pointer.id => self.finish_marquee(cancelled),
            other => self.gesture = other,
        }
    }

    fn on_pointer_leave(&mut self, input: PointerInput, now: Instant) {
        self.set_hover(None);
        if self.gestures.get_pointer(input.pointer_id).is_some() {
            self.on_pointer_up(input, true, now);
        }
    }

    /// Leave the pending state once slop is exceeded.
    fn promote(&mut self, pointer_id: PointerId, target: PendingTarget, position: Point, world: Point) {
        match target {
            PendingTarget::Object(_) => self.begin_drag(pointer_id, world),
            PendingTarget::Marquee => {
                if !self.marquee.start_rectangle_select() {
                    self.gesture = Gesture::Idle;
                    return;
                }
                self.gesture = Gesture::Marquee { pointer_id };
                if let Some(rect) = self.marquee.update_rectangle(world) {
                    self.scene.set_marquee(Some(MarqueeVisual::new(rect, SELECTION_COLOR)));
                }
            }
            PendingTarget::Pan => {
                self.post(OutboundMessage::PanStarted);
                // Catch up with the distance covered inside the slop radius.
                let start = self.gestures.get_pointer(pointer_id).map_or(position, |p| p.start);
                self.pan_to(pointer_id, start, position);
            }
        }
    }

    fn pan_to(&mut self, pointer_id: PointerId, last: Point, position: Point) {
        let delta = position - last;
        if let Err(err) = self.camera.pan(delta.x, delta.y) {
            log::warn!("Pan frame skipped: {err}");
        }
        self.gesture = Gesture::Panning {
            pointer_id,
            last: position,
        };
        self.scene.request_redraw();
    }

    /// End whatever single-pointer gesture is running, without committing.
    fn abort_gesture(&mut self) {
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Pending { .. } => {
                self.drag.clear_prepared();
                self.marquee.cancel();
            }
            Gesture::Panning { .. } => self.post(OutboundMessage::PanEnded),
            Gesture::Dragging { .. } => self.cancel_drag(),
            Gesture::Marquee { .. } => {
                self.marquee.cancel();
                self.scene.set_marquee(None);
            }
            Gesture::Pinching { .. } => {
                self.camera.end_pinch();
            }
            Gesture::Idle => {}
        }
    }

    // Pinch and wheel

    fn start_pinch(&mut self, now: Instant) {
        self.abort_gesture();
        let pointers = self.gestures.get_all_pointers();
        let [a, b] = pointers.as_slice() else {
            return;
        };
        match self.camera.start_pinch(a.last, b.last) {
            Ok(anchor) => {
                log::debug!("Pinch started between pointers {} and {}", a.id, b.id);
                self.gesture = Gesture::Pinching {
                    pair: [a.id, b.id],
                    initial_distance: anchor.initial_distance,
                };
                self.zoom_activity(now);
            }
            Err(err) => log::warn!("Pinch not started: {err}"),
        }
    }

    /// One finger lifted: keep panning with the other from where it is now.
    fn collapse_pinch(&mut self, now: Instant) {
        self.camera.end_pinch();
        self.last_zoom_at = Some(now);
        let remaining = self.gestures.get_all_pointers();
        if let [survivor] = remaining.as_slice() {
            self.gestures.reset_pointer_start(survivor.id);
            self.post(OutboundMessage::PanStarted);
            self.gesture = Gesture::Panning {
                pointer_id: survivor.id,
                last: survivor.last,
            };
        }
    }

    fn on_wheel(&mut self, delta_y: f64, position: Point, now: Instant) {
        if delta_y == 0.0 {
            return;
        }
        match self.camera.zoom(delta_y, position) {
            Ok(()) => {
                self.zoom_activity(now);
                self.scene.request_redraw();
            }
            Err(err) => log::warn!("Wheel event dropped: {err}"),
        }
    }

    fn zoom_activity(&mut self, now: Instant) {
        if !self.zoom_active {
            self.zoom_active = true;
            self.post(OutboundMessage::ZoomStarted);
        }
        self.last_zoom_at = Some(now);
    }

    fn flush_zoom_debounce(&mut self, now: Instant) {
        if !self.zoom_active || matches!(self.gesture, Gesture::Pinching { .. }) {
            return;
        }
        let debounce = Duration::from_millis(self.config.zoom_end_debounce_ms);
        if self
            .last_zoom_at
            .is_some_and(|at| now.saturating_duration_since(at) >= debounce)
        {
            self.zoom_active = false;
            self.last_zoom_at = None;
            self.post(OutboundMessage::ZoomEnded);
        }
    }

    // Dragging

    fn begin_drag(&mut self, pointer_id: PointerId, world: Point) {
        let start = match self.drag.start_object_drag(&mut self.mirror, &self.selection) {
            Ok(start) => start,
            Err(err) => {
                log::warn!("Drag not started: {err}");
                self.gesture = Gesture::Idle;
                return;
            }
        };

        match start.selection {
            SelectionEffect::Keep => {}
            SelectionEffect::Add => self.apply_selection(vec![start.primary.clone()], Vec::new()),
            SelectionEffect::Replace => {
                let others = self
                    .selection
                    .selected_ids()
                    .into_iter()
                    .filter(|id| *id != start.primary)
                    .collect();
                self.apply_selection(vec![start.primary.clone()], others);
            }
        }
        for id in &start.ids {
            self.refresh_visual(id);
        }

        self.post(OutboundMessage::ObjectDragStarted {
            gesture_id: start.gesture_id,
            ids: start.ids,
            unstack: start.unstack,
        });
        self.gesture = Gesture::Dragging { pointer_id };
        self.drag_to(world);
    }

    fn drag_to(&mut self, world: Point) {
        let poses = match self.drag.update_drag_positions(world, &mut self.mirror) {
            Ok(poses) => poses,
            Err(err) => {
                log::warn!("Drag frame skipped: {err}");
                return;
            }
        };
        for (id, pose) in &poses {
            if !self.scene.place_object(id, pose.point(), pose.rotation) {
                log::debug!("No visual for dragged object {id}");
            }
        }
        self.grid_snap.update(&poses, &self.mirror, self.registry);

        if let Some(update) = self.drag.get_drag_state_update() {
            self.post(OutboundMessage::DragStateUpdate {
                gesture_id: update.gesture_id,
                primary_id: update.primary_id,
                primary: update.primary,
                secondary: update.secondary,
            });
        }
    }

    fn finish_drag(&mut self) {
        let Some(gesture_id) = self.drag.session().map(|s| s.gesture_id.clone()) else {
            return;
        };
        let grid_snap = &self.grid_snap;
        let snap = |pose: Pose| {
            if grid_snap.is_enabled() {
                grid_snap.snap_pose(pose)
            } else {
                pose
            }
        };
        let moved = match self
            .drag
            .end_object_drag(&mut self.mirror, &mut self.index, self.registry, snap)
        {
            Ok(moved) => moved,
            Err(err) => {
                log::warn!("Drag end failed: {err}");
                Vec::new()
            }
        };

        for object in &moved {
            self.refresh_visual(&object.id);
        }
        self.grid_snap.clear();
        if !moved.is_empty() {
            self.post(OutboundMessage::ObjectsMoved { objects: moved });
        }
        self.post(OutboundMessage::DragStateClear);
        self.post(OutboundMessage::ObjectDragEnded { gesture_id });
    }

    /// Discard the drag and put every object back. Nothing is committed.
    fn cancel_drag(&mut self) {
        let Some(gesture_id) = self.drag.session().map(|s| s.gesture_id.clone()) else {
            return;
        };
        let ids = self.drag.dragged_ids();
        self.drag.cancel_object_drag(&mut self.mirror);
        for id in &ids {
            self.index_object(id);
            self.refresh_visual(id);
        }
        self.grid_snap.clear();
        self.post(OutboundMessage::DragStateClear);
        self.post(OutboundMessage::ObjectDragEnded { gesture_id });
    }

    /// A pressed pointer whose target vanished stays inert until released.
    fn forget_pending_target(&mut self, id: &ObjectId) {
        if let Gesture::Pending {
            target: PendingTarget::Object(target),
            ..
        } = &self.gesture
        {
            if target == id {
                log::debug!("Pending target {id} was removed, ignoring the rest of the gesture");
                self.gesture = Gesture::Idle;
            }
        }
    }

    /// Drop a vanished object from the drag; end the drag if it was the last.
    fn forget_dragged(&mut self, id: &ObjectId) {
        let gesture_id = self.drag.session().map(|s| s.gesture_id.clone());
        if self.drag.forget_object(id) {
            return;
        }
        log::debug!("Every dragged object was removed, ending drag");
        self.grid_snap.clear();
        if matches!(self.gesture, Gesture::Dragging { .. }) {
            self.gesture = Gesture::Idle;
        }
        self.post(OutboundMessage::DragStateClear);
        if let Some(gesture_id) = gesture_id {
            self.post(OutboundMessage::ObjectDragEnded { gesture_id });
        }
    }

    fn set_grid_snap_enabled(&mut self, enabled: bool) {
        self.grid_snap.set_enabled(enabled);
        if enabled {
            let poses: Vec<(ObjectId, Pose)> = self
                .drag
                .dragged_ids()
                .into_iter()
                .filter_map(|id| self.drag.live_pose(&id).map(|pose| (id, pose)))
                .collect();
            self.grid_snap.update(&poses, &self.mirror, self.registry);
        }
        self.scene.request_redraw();
    }

    // Selection

    fn click(&mut self, target: PendingTarget, modifiers: Modifiers) {
        match target {
            PendingTarget::Object(id) => {
                if modifiers.multi_select() {
                    if self.selection.is_selected(&id) {
                        self.apply_selection(Vec::new(), vec![id]);
                    } else {
                        self.apply_selection(vec![id], Vec::new());
                    }
                } else {
                    let others = self.selection.selected_ids().into_iter().filter(|o| *o != id).collect();
                    self.apply_selection(vec![id], others);
                }
            }
            PendingTarget::Marquee | PendingTarget::Pan => {
                if self.mode == InteractionMode::Select && !modifiers.multi_select() {
                    let all = self.selection.selected_ids();
                    self.apply_selection(Vec::new(), all);
                }
            }
        }
    }

    fn finish_marquee(&mut self, cancelled: bool) {
        self.scene.set_marquee(None);
        if cancelled {
            self.marquee.cancel();
            return;
        }
        let Some(result) = self.marquee.finish_rectangle_select(&self.index) else {
            return;
        };
        let hits: Vec<ObjectId> = result.hits.into_iter().filter(|id| self.is_hit_target(id)).collect();
        log::debug!("Marquee hit {} objects (additive: {})", hits.len(), result.additive);

        if result.additive {
            let select = hits.into_iter().filter(|id| !self.selection.is_selected(id)).collect();
            self.apply_selection(select, Vec::new());
        } else {
            let unselect = self
                .selection
                .selected_ids()
                .into_iter()
                .filter(|id| !hits.contains(id))
                .collect();
            self.apply_selection(hits, unselect);
        }
    }

    /// Write a selection intent optimistically to the mirror and send it to
    /// the store. The cache is re-derived; the store echo settles it.
    fn apply_selection(&mut self, mut select: Vec<ObjectId>, unselect: Vec<ObjectId>) {
        select.retain(|id| {
            let known = self.mirror.contains(id);
            if !known {
                log::debug!("Not selecting unknown object {id}");
            }
            known
        });
        if select.is_empty() && unselect.is_empty() {
            return;
        }
        let actor = self.selection.actor_id().to_string();
        for id in &unselect {
            if let Some(object) = self.mirror.get_mut(id) {
                if object.selected_by.as_deref() == Some(actor.as_str()) {
                    object.selected_by = None;
                }
            }
        }
        for id in &select {
            if let Some(object) = self.mirror.get_mut(id) {
                object.selected_by = Some(actor.clone());
            }
        }

        self.selection.begin_operation();
        let diff = self.selection.rederive(self.mirror.iter());
        for id in diff.added.iter().chain(&diff.removed) {
            self.refresh_visual(id);
        }

        if !unselect.is_empty() {
            self.post(OutboundMessage::ObjectsUnselected { ids: unselect });
        }
        if !select.is_empty() {
            let screen_rects = select.iter().filter_map(|id| self.screen_rect(id)).collect();
            self.post(OutboundMessage::ObjectsSelected {
                ids: select,
                screen_rects,
            });
        }
    }

    /// Rebuild the selection cache after a store-originated change.
    fn settle_selection(&mut self) {
        let diff = self.selection.sync_from_store(self.mirror.iter());
        for id in diff.added.iter().chain(&diff.removed) {
            if self.mirror.contains(id) {
                self.refresh_visual(id);
            }
        }
    }

    // Hit testing and visuals

    fn is_hit_target(&self, id: &ObjectId) -> bool {
        self.mirror.get(id).is_some_and(|o| !o.locked) && self.scene.is_object_visible(id)
    }

    /// Topmost unlocked, visible object under a world point.
    fn hit_test(&self, world: Point) -> Option<ObjectId> {
        self.index
            .query_point(world)
            .into_iter()
            .find(|id| self.is_hit_target(id))
    }

    fn set_hover(&mut self, next: Option<ObjectId>) {
        if self.hover == next {
            return;
        }
        let previous = std::mem::replace(&mut self.hover, next.clone());
        for id in previous.iter().chain(next.iter()) {
            self.refresh_visual(id);
        }
    }

    /// Re-render an object's visual from the mirror.
    fn refresh_visual(&mut self, id: &ObjectId) {
        let Some(object) = self.mirror.get(id) else {
            log::debug!("No object {id} to render");
            return;
        };
        let visual = VisualState {
            selected: self.selection.is_selected(id),
            hovered: self.hover.as_ref() == Some(id) || self.remote_hovers.contains(id),
            ..VisualState::default()
        };
        let drawable = self.registry.render(object, &visual);
        self.scene.upsert_object(id.clone(), drawable, object.sort_key.clone());
    }

    /// Put an object into the spatial index. Dragged objects stay stale
    /// until the drag ends.
    fn index_object(&mut self, id: &ObjectId) {
        if self.drag.session().is_some_and(|s| s.contains(id)) {
            return;
        }
        if let Some(object) = self.mirror.get(id) {
            self.index.insert(id.clone(), self.registry.bounds(object), object.sort_key.clone());
        }
    }

    fn screen_rect(&self, id: &ObjectId) -> Option<ScreenRect> {
        let object = self.mirror.get(id)?;
        let world = self.registry.bounds(object);
        let screen = self
            .camera
            .converter()
            .world_rect_to_screen(self.camera.camera(), world);
        Some(ScreenRect::new(id.clone(), screen))
    }

    // Store sync

    /// Keep the local drag's live poses and bumped keys over store data.
    fn apply_drag_override(&self, object: &mut SpatialObject) {
        let Some(session) = self.drag.session() else {
            return;
        };
        if let Some(pose) = session.live_pose(&object.id) {
            object.position = pose;
        }
        if let Some(key) = session.new_key(&object.id) {
            object.sort_key = key.to_string();
        }
    }

    fn on_objects_sync(&mut self, mut objects: Vec<SpatialObject>) {
        log::debug!("Full object resync: {} objects", objects.len());
        for object in &mut objects {
            self.apply_drag_override(object);
        }
        self.mirror.replace_all(objects);

        for id in self.drag.dragged_ids() {
            if !self.mirror.contains(&id) {
                self.forget_dragged(&id);
            }
        }
        if let Some(candidate) = self.drag.prepared_id().cloned() {
            if !self.mirror.contains(&candidate) {
                self.drag.forget_object(&candidate);
                self.forget_pending_target(&candidate);
            }
        }

        self.index.clear();
        self.scene.clear_objects();
        self.settle_selection();
        let ids: Vec<ObjectId> = self.mirror.iter().map(|o| o.id.clone()).collect();
        for id in &ids {
            self.index_object(id);
            self.refresh_visual(id);
            self.awareness.hide_if_remotely_dragged(id, &mut self.scene);
        }
        if self.hover.as_ref().is_some_and(|id| !self.mirror.contains(id)) {
            self.hover = None;
        }
    }

    fn on_objects_added(&mut self, objects: Vec<SpatialObject>) {
        let mut ids = Vec::with_capacity(objects.len());
        for mut object in objects {
            self.apply_drag_override(&mut object);
            let id = object.id.clone();
            if self.mirror.upsert(object).is_some() {
                log::debug!("Object {id} added twice, replacing");
            }
            ids.push(id);
        }
        self.settle_selection();
        for id in &ids {
            self.index_object(id);
            self.refresh_visual(id);
            if self.awareness.hide_if_remotely_dragged(id, &mut self.scene) {
                log::debug!("Object {id} arrived mid remote drag, hidden");
            }
        }
    }

    fn on_objects_updated(&mut self, objects: Vec<SpatialObject>) {
        let mut ids = Vec::with_capacity(objects.len());
        for mut object in objects {
            self.apply_drag_override(&mut object);
            let id = object.id.clone();
            if self.mirror.update(object).is_err() {
                log::debug!("Update for unknown object {id} skipped");
                continue;
            }
            ids.push(id);
        }
        self.settle_selection();
        for id in &ids {
            self.index_object(id);
            self.refresh_visual(id);
        }
    }

    fn on_objects_removed(&mut self, ids: &[ObjectId]) {
        for id in ids {
            if self.mirror.remove(id).is_none() {
                log::debug!("Removal of unknown object {id} skipped");
            }
            if self.scene.remove_object(id).is_none() {
                log::debug!("No visual for removed object {id}");
            }
            self.index.remove(id);
            self.awareness.forget_object(id);
            self.remote_hovers.remove(id);
            self.forget_dragged(id);
            self.forget_pending_target(id);
            if self.hover.as_ref() == Some(id) {
                self.hover = None;
            }
        }
        self.settle_selection();
    }

    // Awareness

    fn on_awareness(&mut self, updates: &[AwarenessUpdate], now: Instant) {
        match self
            .awareness
            .apply_broadcast(updates, now, &self.mirror, self.registry, &mut self.scene)
        {
            Ok(Some(hz)) => self.post(OutboundMessage::AwarenessUpdateRate { hz }),
            Ok(None) => {}
            Err(err) => {
                log::error!("Awareness update failed, clearing remote state: {err}");
                self.awareness.clear_all(&mut self.scene);
            }
        }
        self.refresh_remote_hovers();
    }

    fn refresh_remote_hovers(&mut self) {
        let next: HashSet<ObjectId> = self.awareness.remote_hovers().into_iter().map(|(_, id)| id).collect();
        let changed: Vec<ObjectId> = next.symmetric_difference(&self.remote_hovers).cloned().collect();
        self.remote_hovers = next;
        for id in &changed {
            if self.mirror.contains(id) {
                self.refresh_visual(id);
            }
        }
    }

    // Requests

    fn on_resize(&mut self, width: f64, height: f64, device_pixel_ratio: f64) {
        if !(width.is_finite() && height.is_finite() && width >= 0.0 && height >= 0.0) {
            log::warn!("Ignoring invalid viewport size {width}x{height}");
        } else {
            self.viewport = Size::new(width, height);
        }
        self.camera.converter_mut().set_device_pixel_ratio(device_pixel_ratio);
        self.scene.request_redraw();
    }

    fn on_flush(&mut self, request_id: u64) {
        if self.selection.is_settled() {
            self.post(OutboundMessage::Flushed {
                request_id,
                settled: true,
            });
        } else {
            self.polls.push(PendingPoll::Flush { request_id, frames: 0 });
        }
    }

    fn on_request_screen_coords(&mut self, request_id: u64, ids: Vec<ObjectId>) {
        if ids.iter().all(|id| self.mirror.contains(id)) {
            self.answer_screen_coords(request_id, &ids);
        } else {
            self.polls.push(PendingPoll::ScreenCoords {
                request_id,
                ids,
                frames: 0,
            });
        }
    }

    fn answer_screen_coords(&mut self, request_id: u64, ids: &[ObjectId]) {
        let coords = ids.iter().filter_map(|id| self.screen_rect(id)).collect();
        let missing = ids.iter().filter(|id| !self.mirror.contains(id)).cloned().collect();
        self.post(OutboundMessage::ScreenCoords {
            request_id,
            coords,
            missing,
        });
    }

    /// Advance every bounded poll by one frame.
    fn advance_polls(&mut self) {
        let max_frames = self.config.max_poll_frames;
        for poll in std::mem::take(&mut self.polls) {
            match poll {
                PendingPoll::Flush { request_id, frames } => {
                    let frames = frames + 1;
                    let settled = self.selection.is_settled();
                    if settled || frames >= max_frames {
                        if !settled {
                            log::warn!(
                                "Flush {request_id} timed out after {frames} frames with {} operations pending",
                                self.selection.pending_operations()
                            );
                        }
                        self.post(OutboundMessage::Flushed { request_id, settled });
                    } else {
                        self.polls.push(PendingPoll::Flush { request_id, frames });
                    }
                }
                PendingPoll::ScreenCoords { request_id, ids, frames } => {
                    let frames = frames + 1;
                    let ready = ids.iter().all(|id| self.mirror.contains(id));
                    if ready || frames >= max_frames {
                        if !ready {
                            log::warn!("Screen coords {request_id} timed out after {frames} frames");
                        }
                        self.answer_screen_coords(request_id, &ids);
                    } else {
                        self.polls.push(PendingPoll::ScreenCoords { request_id, ids, frames });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::PointerType;
    use crate::transport::VecSink;

    fn token(id: &str, x: f64, y: f64, key: &str) -> SpatialObject {
        SpatialObject::new(id, ObjectKind::Token, Pose::new(x, y, 0.0), key)
    }

    fn pointer(id: PointerId, pointer_type: PointerType, x: f64, y: f64) -> PointerInput {
        PointerInput {
            pointer_id: id,
            pointer_type,
            x,
            y,
            modifiers: Modifiers::default(),
            is_primary: id == 1,
        }
    }

    fn engine(registry: &KindRegistry) -> Engine<'_, VecSink> {
        let mut engine = Engine::new(EngineConfig::for_actor("me", 1), registry, VecSink::new());
        engine.handle_message(
            InboundMessage::ObjectsSync {
                objects: vec![token("a", 0.0, 0.0, "0|a"), token("b", 200.0, 0.0, "0|b")],
            },
            Instant::now(),
        );
        engine.sink_mut().drain();
        engine
    }

    #[test]
    fn test_tap_below_slop_selects_without_drag() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Mouse, 2.0, 2.0)), now);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 2.0, 2.0)), now);

        let messages = engine.sink_mut().drain();
        assert!(!messages.iter().any(|m| matches!(m, OutboundMessage::ObjectDragStarted { .. })));
        assert!(messages.iter().any(|m| matches!(m, OutboundMessage::ObjectsSelected { ids, .. } if ids == &[ObjectId::from("a")])));
        assert!(engine.selection().is_selected(&ObjectId::from("a")));
        assert_eq!(engine.selection().pending_operations(), 1);
    }

    #[test]
    fn test_cancel_skips_click_select() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerCancel(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        assert!(engine.selection().is_empty());
        assert!(engine.sink_mut().drain().is_empty());
    }

    #[test]
    fn test_cancel_still_commits_a_drag() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Mouse, 30.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerCancel(pointer(1, PointerType::Mouse, 30.0, 0.0)), now);

        let messages = engine.sink_mut().drain();
        let moved: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::ObjectsMoved { objects } => Some(objects),
                _ => None,
            })
            .collect();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0][0].pose, Pose::new(30.0, 0.0, 0.0));
        assert!(!engine.drag().is_dragging());
    }

    #[test]
    fn test_empty_space_pans_in_pan_mode() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 500.0, 500.0)), now);
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Mouse, 520.0, 510.0)), now);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 520.0, 510.0)), now);

        assert_eq!(engine.camera().camera().pan, kurbo::Vec2::new(20.0, 10.0));
        let messages = engine.sink_mut().drain();
        assert!(messages.contains(&OutboundMessage::PanStarted));
        assert!(messages.contains(&OutboundMessage::PanEnded));
    }

    #[test]
    fn test_locked_object_behaves_as_empty_space() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let mut locked = token("a", 0.0, 0.0, "0|a");
        locked.locked = true;
        engine.handle_message(InboundMessage::ObjectsUpdated { objects: vec![locked] }, Instant::now());

        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Mouse, 40.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 40.0, 0.0)), now);
        assert_eq!(engine.mirror().get(&ObjectId::from("a")).unwrap().position, Pose::new(0.0, 0.0, 0.0));
        assert!(engine.sink_mut().drain().contains(&OutboundMessage::PanStarted));
    }

    #[test]
    fn test_pointer_leave_while_pressed_skips_click() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerLeave(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        assert!(engine.selection().is_empty());
        assert!(engine.sink_mut().drain().is_empty());

        // The pointer is no longer tracked, so a late up does nothing.
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        assert!(engine.sink_mut().drain().is_empty());
    }

    #[test]
    fn test_pointer_leave_mid_drag_commits() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Mouse, 25.0, 5.0)), now);
        engine.sink_mut().drain();

        engine.handle_message(InboundMessage::PointerLeave(pointer(1, PointerType::Mouse, 25.0, 5.0)), now);
        let messages = engine.sink_mut().drain();
        assert!(messages.iter().any(|m| matches!(
            m,
            OutboundMessage::ObjectsMoved { objects } if objects[0].pose == Pose::new(25.0, 5.0, 0.0)
        )));
        assert!(messages.contains(&OutboundMessage::DragStateClear));
        assert!(!engine.drag().is_dragging());
    }

    #[test]
    fn test_removed_candidate_is_not_clicked() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::ObjectsRemoved { ids: vec![ObjectId::from("a")] }, now);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);

        let messages = engine.sink_mut().drain();
        assert!(!messages.iter().any(|m| matches!(m, OutboundMessage::ObjectsSelected { .. })));
        assert_eq!(engine.selection().pending_operations(), 0);
        assert!(engine.selection().is_empty());
    }

    #[test]
    fn test_resync_without_candidate_is_not_clicked() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::ObjectsSync { objects: vec![token("b", 200.0, 0.0, "0|b")] }, now);
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Mouse, 30.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 30.0, 0.0)), now);

        let messages = engine.sink_mut().drain();
        assert!(!messages.iter().any(|m| matches!(
            m,
            OutboundMessage::ObjectsSelected { .. } | OutboundMessage::ObjectDragStarted { .. }
        )));
        assert!(engine.selection().is_settled());
    }

    #[test]
    fn test_huge_mat_is_hit_tested() {
        let registry = KindRegistry::with_defaults();
        let mut engine = Engine::new(EngineConfig::for_actor("me", 1), &registry, VecSink::new());
        let mut mat = SpatialObject::new("mat", ObjectKind::Mat, Pose::new(0.0, 0.0, 0.0), "0|0");
        mat.meta.insert("width".into(), serde_json::json!(1e9));
        mat.meta.insert("height".into(), serde_json::json!(1e9));
        let now = Instant::now();
        engine.handle_message(
            InboundMessage::ObjectsSync {
                objects: vec![mat, token("a", 0.0, 0.0, "0|a")],
            },
            now,
        );

        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 4e8, -2e8)), now);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 4e8, -2e8)), now);
        assert!(engine.selection().is_selected(&ObjectId::from("mat")));

        // Objects above the mat still win the hit test.
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        assert!(engine.selection().is_selected(&ObjectId::from("a")));
    }

    #[test]
    fn test_pinch_collapse_continues_panning() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Touch, 400.0, 300.0)), now);
        engine.handle_message(InboundMessage::PointerDown(pointer(2, PointerType::Touch, 500.0, 300.0)), now);
        engine.handle_message(InboundMessage::PointerMove(pointer(2, PointerType::Touch, 600.0, 300.0)), now);
        assert!((engine.camera().scale() - 2.0).abs() < 1e-9);

        engine.handle_message(InboundMessage::PointerUp(pointer(2, PointerType::Touch, 600.0, 300.0)), now);
        let pan_before = engine.camera().camera().pan;
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Touch, 401.0, 300.0)), now);
        assert!((engine.camera().camera().pan.x - pan_before.x - 1.0).abs() < 1e-9);

        let messages = engine.sink_mut().drain();
        assert!(messages.contains(&OutboundMessage::ZoomStarted));
        assert!(messages.contains(&OutboundMessage::PanStarted));
    }

    #[test]
    fn test_zoom_end_is_debounced() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let t0 = Instant::now();
        let wheel = InboundMessage::Wheel {
            delta_y: -1.0,
            x: 0.0,
            y: 0.0,
        };
        engine.handle_message(wheel.clone(), t0);
        engine.handle_message(wheel, t0 + Duration::from_millis(200));
        engine.tick(t0 + Duration::from_millis(300));
        assert_eq!(engine.sink_mut().drain(), vec![OutboundMessage::ZoomStarted]);

        engine.tick(t0 + Duration::from_millis(450));
        assert_eq!(engine.sink_mut().drain(), vec![OutboundMessage::ZoomEnded]);
    }

    #[test]
    fn test_flush_waits_for_store_echo() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::Flush { request_id: 4 }, now);
        engine.sink_mut().drain();

        engine.tick(now);
        assert!(engine.sink_mut().drain().is_empty());

        let mut echoed = token("a", 0.0, 0.0, "0|a");
        echoed.selected_by = Some("me".into());
        engine.handle_message(InboundMessage::ObjectsUpdated { objects: vec![echoed] }, now);
        engine.tick(now);
        assert_eq!(
            engine.sink_mut().drain(),
            vec![OutboundMessage::Flushed {
                request_id: 4,
                settled: true
            }]
        );
    }

    #[test]
    fn test_flush_times_out() {
        let registry = KindRegistry::with_defaults();
        let mut config = EngineConfig::for_actor("me", 1);
        config.max_poll_frames = 3;
        let mut engine = Engine::new(config, &registry, VecSink::new());
        let now = Instant::now();
        engine.handle_message(InboundMessage::ObjectsSync { objects: vec![token("a", 0.0, 0.0, "0|a")] }, now);
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::Flush { request_id: 1 }, now);
        engine.sink_mut().drain();

        engine.tick(now);
        engine.tick(now);
        assert!(engine.sink_mut().drain().is_empty());
        engine.tick(now);
        assert_eq!(
            engine.sink_mut().drain(),
            vec![OutboundMessage::Flushed {
                request_id: 1,
                settled: false
            }]
        );
    }

    #[test]
    fn test_screen_coords_wait_for_late_object() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(
            InboundMessage::RequestScreenCoords {
                request_id: 9,
                ids: vec![ObjectId::from("a"), ObjectId::from("late")],
            },
            now,
        );
        assert!(engine.sink_mut().drain().is_empty());

        engine.handle_message(InboundMessage::ObjectsAdded { objects: vec![token("late", 100.0, 100.0, "0|c")] }, now);
        engine.tick(now);
        let messages = engine.sink_mut().drain();
        let [OutboundMessage::ScreenCoords { request_id, coords, missing }] = messages.as_slice() else {
            panic!("expected one screen_coords, got {messages:?}");
        };
        assert_eq!(*request_id, 9);
        assert_eq!(coords.len(), 2);
        assert!(missing.is_empty());
        // Token footprint is 40x40 centered on the pose.
        assert_eq!(coords[1].x, 80.0);
        assert_eq!(coords[1].width, 40.0);
    }

    #[test]
    fn test_removed_dragged_object_ends_drag() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Mouse, 30.0, 0.0)), now);
        engine.sink_mut().drain();

        engine.handle_message(InboundMessage::ObjectsRemoved { ids: vec![ObjectId::from("a")] }, now);
        assert!(!engine.drag().is_dragging());
        let messages = engine.sink_mut().drain();
        assert!(messages.contains(&OutboundMessage::DragStateClear));

        // The rest of the gesture is inert.
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 50.0, 0.0)), now);
        assert!(!engine
            .sink_mut()
            .drain()
            .iter()
            .any(|m| matches!(m, OutboundMessage::ObjectsMoved { .. })));
    }

    #[test]
    fn test_update_mid_drag_keeps_live_pose() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Mouse, 30.0, 0.0)), now);

        let mut stale = token("a", 0.0, 0.0, "0|a");
        stale.selected_by = Some("me".into());
        engine.handle_message(InboundMessage::ObjectsUpdated { objects: vec![stale] }, now);
        let a = engine.mirror().get(&ObjectId::from("a")).unwrap();
        assert_eq!(a.position, Pose::new(30.0, 0.0, 0.0));
        assert!(a.sort_key.as_str() > "0|b");
    }

    #[test]
    fn test_grid_snap_commits_snapped_pose() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        engine.handle_message(InboundMessage::SetGridSnapEnabled { enabled: true }, now);
        engine.handle_message(InboundMessage::PointerDown(pointer(1, PointerType::Mouse, 0.0, 0.0)), now);
        engine.handle_message(InboundMessage::PointerMove(pointer(1, PointerType::Mouse, 63.0, 21.0)), now);
        assert_eq!(engine.grid_snap().ghost_count(), 1);
        engine.handle_message(InboundMessage::PointerUp(pointer(1, PointerType::Mouse, 63.0, 21.0)), now);

        assert_eq!(engine.mirror().get(&ObjectId::from("a")).unwrap().position, Pose::new(50.0, 0.0, 0.0));
        assert_eq!(engine.grid_snap().ghost_count(), 0);
    }

    #[test]
    fn test_bad_awareness_clears_remote_state() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let now = Instant::now();
        let good: Vec<AwarenessUpdate> =
            serde_json::from_str(r#"[{"client_id": 5, "state": {"cursor": {"x": 1.0, "y": 1.0}}}]"#).unwrap();
        engine.handle_message(InboundMessage::AwarenessUpdate { updates: good }, now);
        assert_eq!(engine.awareness().len(), 1);

        let mut bad: Vec<AwarenessUpdate> =
            serde_json::from_str(r#"[{"client_id": 5, "state": {"cursor": {"x": 1.0, "y": 1.0}}}]"#).unwrap();
        bad[0].state.cursor = Some(Point::new(f64::NAN, 0.0));
        engine.handle_message(InboundMessage::AwarenessUpdate { updates: bad }, now);
        assert!(engine.awareness().is_empty());
    }

    #[test]
    fn test_awareness_rate_is_reported_with_hysteresis() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let updates: Vec<AwarenessUpdate> =
            serde_json::from_str(r#"[{"client_id": 5, "state": {"cursor": {"x": 1.0, "y": 1.0}}}]"#).unwrap();
        let t0 = Instant::now();
        for i in 0..30 {
            engine.handle_message(
                InboundMessage::AwarenessUpdate {
                    updates: updates.clone(),
                },
                t0 + Duration::from_millis(33 * i),
            );
        }

        let rates: Vec<f64> = engine
            .sink_mut()
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::AwarenessUpdateRate { hz } => Some(hz),
                _ => None,
            })
            .collect();
        // Reports need a 2 Hz move and 250 ms since the previous one.
        assert_eq!(rates, vec![2.0, 10.0, 18.0, 26.0]);
    }

    #[test]
    fn test_remote_hover_highlights() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let updates: Vec<AwarenessUpdate> =
            serde_json::from_str(r#"[{"client_id": 5, "state": {"hover": "b"}}]"#).unwrap();
        engine.handle_message(InboundMessage::AwarenessUpdate { updates }, Instant::now());
        let visual = engine.scene().object(&ObjectId::from("b")).unwrap();
        assert!(visual.drawable.highlighted);
    }

    #[test]
    fn test_display_list_layers() {
        let registry = KindRegistry::with_defaults();
        let mut engine = engine(&registry);
        let updates: Vec<AwarenessUpdate> = serde_json::from_str(
            r#"[{"client_id": 5, "state": {"cursor": {"x": 1.0, "y": 1.0},
                "drag": {"gesture_id": "g", "primary_id": "b", "primary": {"x": 300.0, "y": 0.0}}}}]"#,
        )
        .unwrap();
        engine.handle_message(InboundMessage::AwarenessUpdate { updates }, Instant::now());

        let list = engine.display_list();
        let objects = list.iter().filter(|i| matches!(i, DisplayItem::Object(_))).count();
        let ghosts = list.iter().filter(|i| matches!(i, DisplayItem::Ghost(_))).count();
        let cursors = list.iter().filter(|i| matches!(i, DisplayItem::Cursor(_))).count();
        assert_eq!((objects, ghosts, cursors), (1, 1, 1));
        assert!(matches!(list.last(), Some(DisplayItem::Cursor(_))));
        assert!(engine.take_redraw_request());
    }
}
