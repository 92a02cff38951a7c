//! Grid-snap previews during a drag.
//!
//! Purely local: ghosts are never broadcast. One ghost is cached per dragged
//! object, created the first time that object is seen and dropped only when
//! it leaves the dragged set.

use std::collections::{HashMap, HashSet};

use kurbo::Point;

use crate::object::{ObjectId, ObjectMirror, Pose};
use crate::registry::KindRegistry;
use crate::scene::{Drawable, SELECTION_COLOR, VisualState};

/// Snap a point to the nearest grid intersection.
pub fn snap_to_grid(point: Point, grid_size: f64) -> Point {
    Point::new(
        (point.x / grid_size).round() * grid_size,
        (point.y / grid_size).round() * grid_size,
    )
}

/// Local snap-preview ghosts.
#[derive(Debug, Clone)]
pub struct GridSnapManager {
    enabled: bool,
    grid_size: f64,
    ghost_alpha: f32,
    ghosts: HashMap<ObjectId, Drawable>,
    ghosts_created: usize,
}

impl GridSnapManager {
    pub fn new(grid_size: f64, ghost_alpha: f32) -> Self {
        Self {
            enabled: false,
            grid_size,
            ghost_alpha,
            ghosts: HashMap::new(),
            ghosts_created: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle snapping. Disabling drops every ghost.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.clear();
        }
    }

    /// Snapped destination of a pose. Rotation is kept.
    pub fn snap_pose(&self, pose: Pose) -> Pose {
        let snapped = snap_to_grid(pose.point(), self.grid_size);
        Pose::new(snapped.x, snapped.y, pose.rotation)
    }

    /// Refresh ghosts for the dragged objects' live poses.
    pub fn update(&mut self, dragged: &[(ObjectId, Pose)], mirror: &ObjectMirror, registry: &KindRegistry) {
        if !self.enabled {
            return;
        }
        let live: HashSet<&ObjectId> = dragged.iter().map(|(id, _)| id).collect();
        self.ghosts.retain(|id, _| live.contains(id));

        for (id, pose) in dragged {
            let target = self.snap_pose(*pose);
            if let Some(ghost) = self.ghosts.get_mut(id) {
                ghost.place(target.point(), target.rotation);
                continue;
            }
            let Some(object) = mirror.get(id) else {
                log::debug!("No object {id} for snap ghost");
                continue;
            };
            let mut ghost = registry.render(object, &VisualState::ghost(self.ghost_alpha, Some(SELECTION_COLOR)));
            ghost.place(target.point(), target.rotation);
            self.ghosts.insert(id.clone(), ghost);
            self.ghosts_created += 1;
        }
    }

    pub fn clear(&mut self) {
        self.ghosts.clear();
    }

    pub fn ghost(&self, id: &ObjectId) -> Option<&Drawable> {
        self.ghosts.get(id)
    }

    pub fn ghosts(&self) -> impl Iterator<Item = &Drawable> {
        self.ghosts.values()
    }

    pub fn ghost_count(&self) -> usize {
        self.ghosts.len()
    }

    /// Total ghosts ever allocated.
    pub fn ghosts_created(&self) -> usize {
        self.ghosts_created
    }
}
