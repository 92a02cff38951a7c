//! Remote presence: cursors, drag ghosts, and update-rate tracking.
//!
//! Peers broadcast their awareness state at roughly 30 Hz. Each broadcast is
//! the full list of connected clients, so any client missing from the latest
//! list is gone and its visuals are torn down. While a peer drags objects,
//! the real local visuals of those objects are hidden and a ghost rebuilt
//! from the peer's latest packet stands in for them.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use kurbo::{Point, Rect};
use peniko::Color;
use serde::{Deserialize, Serialize};

use crate::Instant;
use crate::config::EngineConfig;
use crate::drag::DragBroadcast;
use crate::error::{EngineError, EngineResult};
use crate::marquee::InteractionMode;
use crate::object::{ObjectId, ObjectMirror};
use crate::registry::KindRegistry;
use crate::scene::{CursorVisual, Drawable, MarqueeVisual, Scene, VisualState};

/// Display name and color of a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    /// CSS-style `#rrggbb`.
    pub color: String,
}

/// Awareness state broadcast by one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessState {
    /// Cursor in world coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drag: Option<DragBroadcast>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hover: Option<ObjectId>,
    /// Marquee rectangle in world coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lasso: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_mode: Option<InteractionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
}

/// One client's entry in a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub client_id: u64,
    pub state: AwarenessState,
}

const CURSOR_PALETTE: [Color; 8] = [
    Color::from_rgba8(239, 68, 68, 255),
    Color::from_rgba8(249, 115, 22, 255),
    Color::from_rgba8(234, 179, 8, 255),
    Color::from_rgba8(34, 197, 94, 255),
    Color::from_rgba8(20, 184, 166, 255),
    Color::from_rgba8(59, 130, 246, 255),
    Color::from_rgba8(168, 85, 247, 255),
    Color::from_rgba8(236, 72, 153, 255),
];

/// Parse `#rrggbb` into a color.
fn parse_hex_color(hex: &str) -> Option<Color> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
    Some(Color::from_rgba8(channel(0)?, channel(2)?, channel(4)?, 255))
}

fn client_color(client_id: u64, user: Option<&UserInfo>) -> Color {
    user.and_then(|u| parse_hex_color(&u.color))
        .unwrap_or(CURSOR_PALETTE[(client_id % CURSOR_PALETTE.len() as u64) as usize])
}

fn client_label(client_id: u64, user: Option<&UserInfo>) -> String {
    user.map(|u| u.name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("Player {client_id}"))
}

/// Rolling-window estimate of the awareness arrival rate.
#[derive(Debug, Clone)]
pub struct RateTracker {
    window: Duration,
    min_delta_hz: f64,
    min_interval: Duration,
    arrivals: VecDeque<Instant>,
    last_reported_hz: f64,
    last_report_at: Option<Instant>,
}

impl RateTracker {
    pub fn new(window: Duration, min_delta_hz: f64, min_interval: Duration) -> Self {
        Self {
            window,
            min_delta_hz,
            min_interval,
            arrivals: VecDeque::new(),
            last_reported_hz: 0.0,
            last_report_at: None,
        }
    }

    /// Arrivals per second over the window ending at `now`.
    pub fn current_hz(&self) -> f64 {
        self.arrivals.len() as f64 / self.window.as_secs_f64()
    }

    /// Record one arrival. Returns a new rate when it moved enough and the
    /// last report is old enough.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.arrivals.push_back(now);
        while let Some(&oldest) = self.arrivals.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }

        let hz = self.current_hz();
        let moved_enough = (hz - self.last_reported_hz).abs() >= self.min_delta_hz;
        let waited_enough = self
            .last_report_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.min_interval);
        if moved_enough && waited_enough {
            self.last_reported_hz = hz;
            self.last_report_at = Some(now);
            Some(hz)
        } else {
            None
        }
    }

    pub fn last_reported_hz(&self) -> f64 {
        self.last_reported_hz
    }
}

/// Local bookkeeping for one remote client.
#[derive(Debug, Clone)]
pub struct AwarenessEntry {
    pub client_id: u64,
    pub state: AwarenessState,
    pub cursor: Option<CursorVisual>,
    pub ghost: Vec<Drawable>,
    pub lasso: Option<MarqueeVisual>,
    ghost_gesture: Option<String>,
    /// Objects whose real visual is hidden because of this client's drag.
    hidden: HashSet<ObjectId>,
}

impl AwarenessEntry {
    fn new(client_id: u64) -> Self {
        Self {
            client_id,
            state: AwarenessState::default(),
            cursor: None,
            ghost: Vec::new(),
            lasso: None,
            ghost_gesture: None,
            hidden: HashSet::new(),
        }
    }

    pub fn hidden(&self) -> &HashSet<ObjectId> {
        &self.hidden
    }

    fn drags(&self, id: &ObjectId) -> bool {
        self.state
            .drag
            .as_ref()
            .is_some_and(|d| d.object_ids().any(|o| o == id))
    }
}

/// Renders and tracks every remote client's awareness.
#[derive(Debug, Clone)]
pub struct AwarenessManager {
    local_client_id: u64,
    ghost_alpha: f32,
    entries: BTreeMap<u64, AwarenessEntry>,
    rate: RateTracker,
}

impl AwarenessManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            local_client_id: config.client_id,
            ghost_alpha: config.remote_ghost_alpha,
            entries: BTreeMap::new(),
            rate: RateTracker::new(
                Duration::from_millis(config.awareness_window_ms),
                config.rate_report_min_delta_hz,
                Duration::from_millis(config.rate_report_min_interval_ms),
            ),
        }
    }

    pub fn entry(&self, client_id: u64) -> Option<&AwarenessEntry> {
        self.entries.get(&client_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &AwarenessEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any peer's current drag covers `id`.
    pub fn is_object_remotely_dragged(&self, id: &ObjectId) -> bool {
        self.entries.values().any(|e| e.drags(id))
    }

    /// Ids of objects a peer is hovering.
    pub fn remote_hovers(&self) -> Vec<(u64, ObjectId)> {
        self.entries
            .values()
            .filter_map(|e| e.state.hover.clone().map(|id| (e.client_id, id)))
            .collect()
    }

    fn hidden_by_other(&self, client_id: u64, id: &ObjectId) -> bool {
        self.entries
            .values()
            .any(|e| e.client_id != client_id && e.hidden.contains(id))
    }

    /// Hide a freshly created object if a peer already claims it mid-drag.
    pub fn hide_if_remotely_dragged(&mut self, id: &ObjectId, scene: &mut Scene) -> bool {
        let Some(entry) = self.entries.values_mut().find(|e| e.drags(id)) else {
            return false;
        };
        entry.hidden.insert(id.clone());
        scene.set_object_visible(id, false);
        true
    }

    /// Apply one full broadcast.
    ///
    /// Returns a new update rate when it should be reported upstream. On
    /// error nothing has been changed; callers recover with [`Self::clear_all`].
    pub fn apply_broadcast(
        &mut self,
        updates: &[AwarenessUpdate],
        now: Instant,
        mirror: &ObjectMirror,
        registry: &KindRegistry,
        scene: &mut Scene,
    ) -> EngineResult<Option<f64>> {
        for update in updates {
            validate(update)?;
        }
        let rate = self.rate.record(now);

        let present: HashSet<u64> = updates
            .iter()
            .map(|u| u.client_id)
            .filter(|id| *id != self.local_client_id)
            .collect();
        let departed: Vec<u64> = self.entries.keys().copied().filter(|id| !present.contains(id)).collect();
        for client_id in departed {
            self.remove_entry(client_id, scene);
        }

        for update in updates {
            if update.client_id == self.local_client_id {
                continue;
            }
            if !self.entries.contains_key(&update.client_id) {
                log::debug!("Awareness: client {} appeared", update.client_id);
                self.entries.insert(update.client_id, AwarenessEntry::new(update.client_id));
            }
            self.apply_state(update.client_id, &update.state, mirror, registry, scene);
        }
        scene.request_redraw();
        Ok(rate)
    }

    fn apply_state(
        &mut self,
        client_id: u64,
        state: &AwarenessState,
        mirror: &ObjectMirror,
        registry: &KindRegistry,
        scene: &mut Scene,
    ) {
        let wanted: HashSet<ObjectId> = state
            .drag
            .as_ref()
            .map(|d| d.object_ids().cloned().collect())
            .unwrap_or_default();

        let previously_hidden = match self.entries.get(&client_id) {
            Some(entry) => entry.hidden.clone(),
            None => return,
        };
        let released: Vec<ObjectId> = previously_hidden.difference(&wanted).cloned().collect();
        for id in &released {
            if !self.hidden_by_other(client_id, id) {
                scene.set_object_visible(id, true);
            }
        }

        let ghost_alpha = self.ghost_alpha;
        let Some(entry) = self.entries.get_mut(&client_id) else {
            return;
        };
        let color = client_color(client_id, state.user.as_ref());

        for id in &wanted {
            entry.hidden.insert(id.clone());
            scene.set_object_visible(id, false);
        }
        entry.hidden.retain(|id| wanted.contains(id));

        entry.cursor = state.cursor.map(|position| CursorVisual {
            client_id,
            position,
            label: client_label(client_id, state.user.as_ref()),
            color,
        });
        entry.lasso = state.lasso.map(|rect| MarqueeVisual::new(rect.abs(), color));

        match &state.drag {
            Some(drag) => {
                let poses = drag.absolute_poses();
                let known = poses.iter().filter(|(id, _)| mirror.contains(id)).count();
                let reusable = entry.ghost_gesture.as_deref() == Some(drag.gesture_id.as_str())
                    && entry.ghost.len() == known;
                if reusable {
                    for (ghost, (_, pose)) in entry
                        .ghost
                        .iter_mut()
                        .zip(poses.iter().filter(|(id, _)| mirror.contains(id)))
                    {
                        ghost.place(pose.point(), pose.rotation);
                    }
                } else {
                    let visual = VisualState::ghost(ghost_alpha, Some(color));
                    entry.ghost = poses
                        .iter()
                        .filter_map(|(id, pose)| {
                            let Some(object) = mirror.get(id) else {
                                log::debug!("Awareness: ghost member {id} not in mirror yet");
                                return None;
                            };
                            let mut drawable = registry.render(object, &visual);
                            drawable.place(pose.point(), pose.rotation);
                            Some(drawable)
                        })
                        .collect();
                    entry.ghost_gesture = Some(drag.gesture_id.clone());
                }
            }
            None => {
                entry.ghost.clear();
                entry.ghost_gesture = None;
            }
        }
        entry.state = state.clone();
    }

    fn remove_entry(&mut self, client_id: u64, scene: &mut Scene) {
        let Some(entry) = self.entries.remove(&client_id) else {
            return;
        };
        log::debug!(
            "Awareness: client {client_id} left, restoring {} hidden objects",
            entry.hidden.len()
        );
        for id in &entry.hidden {
            if !self.hidden_by_other(client_id, id) {
                scene.set_object_visible(id, true);
            }
        }
        scene.request_redraw();
    }

    /// Drop every remote entry and restore every hidden object.
    pub fn clear_all(&mut self, scene: &mut Scene) {
        for entry in std::mem::take(&mut self.entries).into_values() {
            for id in &entry.hidden {
                scene.set_object_visible(id, true);
            }
        }
        scene.request_redraw();
    }

    /// Forget an object removed from the store.
    pub fn forget_object(&mut self, id: &ObjectId) {
        for entry in self.entries.values_mut() {
            entry.hidden.remove(id);
        }
    }

    pub fn cursors(&self) -> impl Iterator<Item = &CursorVisual> {
        self.entries.values().filter_map(|e| e.cursor.as_ref())
    }

    pub fn ghosts(&self) -> impl Iterator<Item = &Drawable> {
        self.entries.values().flat_map(|e| e.ghost.iter())
    }

    pub fn lassos(&self) -> impl Iterator<Item = &MarqueeVisual> {
        self.entries.values().filter_map(|e| e.lasso.as_ref())
    }

    pub fn last_reported_rate(&self) -> f64 {
        self.rate.last_reported_hz()
    }
}

fn validate(update: &AwarenessUpdate) -> EngineResult<()> {
    let malformed = |reason: &str| EngineError::MalformedAwareness {
        client_id: update.client_id,
        reason: reason.to_string(),
    };
    if let Some(cursor) = update.state.cursor {
        if !cursor.x.is_finite() || !cursor.y.is_finite() {
            return Err(malformed("non-finite cursor"));
        }
    }
    if let Some(drag) = &update.state.drag {
        if !drag.is_finite() {
            return Err(malformed("non-finite drag pose"));
        }
    }
    if let Some(lasso) = update.state.lasso {
        if ![lasso.x0, lasso.y0, lasso.x1, lasso.y1].iter().all(|v| v.is_finite()) {
            return Err(malformed("non-finite lasso"));
        }
    }
    Ok(())
}
