//! Rectangle (marquee) selection.

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

use crate::object::ObjectId;
use crate::spatial::SpatialIndex;

/// What a primary-button drag on empty space does by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    #[default]
    Pan,
    Select,
}

/// Whether a pointer-down on empty space should become a marquee.
///
/// Select mode marquees without a modifier; pan mode marquees with one.
pub fn marquee_allowed(mode: InteractionMode, modifier_held: bool) -> bool {
    match mode {
        InteractionMode::Select => !modifier_held,
        InteractionMode::Pan => modifier_held,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
enum Phase {
    #[default]
    Idle,
    Prepared {
        start: Point,
        additive: bool,
    },
    Active {
        start: Point,
        current: Point,
        additive: bool,
    },
}

/// Hits of a finished marquee.
#[derive(Debug, Clone, PartialEq)]
pub struct MarqueeResult {
    pub rect: Rect,
    pub hits: Vec<ObjectId>,
    /// Add to the selection instead of replacing it. Captured at pointer-down.
    pub additive: bool,
}

/// Marquee geometry and lifecycle.
#[derive(Debug, Clone, Default)]
pub struct SelectionRectangleManager {
    phase: Phase,
}

impl SelectionRectangleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stash the start corner at pointer-down. `additive` is the modifier
    /// state at this moment and is not re-read later.
    pub fn prepare_rectangle_select(&mut self, start: Point, additive: bool) {
        self.phase = Phase::Prepared { start, additive };
    }

    /// Promote a prepared marquee once slop is exceeded.
    pub fn start_rectangle_select(&mut self) -> bool {
        match self.phase {
            Phase::Prepared { start, additive } => {
                self.phase = Phase::Active {
                    start,
                    current: start,
                    additive,
                };
                true
            }
            _ => false,
        }
    }

    /// Move the live corner. Returns the rectangle to draw.
    pub fn update_rectangle(&mut self, end: Point) -> Option<Rect> {
        match &mut self.phase {
            Phase::Active { start, current, .. } => {
                *current = end;
                Some(Rect::from_points(*start, end))
            }
            _ => None,
        }
    }

    /// Finish the marquee and range-query the index.
    pub fn finish_rectangle_select(&mut self, index: &SpatialIndex) -> Option<MarqueeResult> {
        match std::mem::take(&mut self.phase) {
            Phase::Active { start, current, additive } => {
                let rect = Rect::from_points(start, current);
                Some(MarqueeResult {
                    rect,
                    hits: index.query_rect(rect),
                    additive,
                })
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.phase = Phase::Idle;
    }
}
