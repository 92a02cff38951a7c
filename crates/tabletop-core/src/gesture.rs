//! Pointer tracking and gesture classification.
//!
//! Every down pointer is tracked by id from pointer-down until up/cancel.
//! Pan, drag, and marquee gestures only start once the pointer has moved
//! past the slop threshold for its type, so taps stay taps.

use std::collections::HashMap;

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

use crate::config::SlopThresholds;

/// Host-assigned pointer identifier.
pub type PointerId = i64;

/// Physical input device behind a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerType {
    #[default]
    Mouse,
    Pen,
    Touch,
}

/// Modifier keys state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    /// Whether a multi-select modifier is held.
    pub fn multi_select(&self) -> bool {
        self.shift || self.ctrl || self.meta
    }
}

/// A pointer that is currently down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointer {
    pub id: PointerId,
    pub pointer_type: PointerType,
    /// Screen position at pointer-down (or at the last re-baseline).
    pub start: Point,
    /// Most recent screen position.
    pub last: Point,
    seq: u64,
}

impl Pointer {
    /// Displacement from start to last position.
    pub fn displacement(&self) -> Vec2 {
        self.last - self.start
    }
}

/// Tracks active pointers and classifies gestures.
#[derive(Debug, Clone)]
pub struct GestureRecognizer {
    pointers: HashMap<PointerId, Pointer>,
    slop: SlopThresholds,
    next_seq: u64,
}

impl GestureRecognizer {
    pub fn new(slop: SlopThresholds) -> Self {
        Self {
            pointers: HashMap::new(),
            slop,
            next_seq: 0,
        }
    }

    /// Start tracking a pointer. A repeated down for the same id re-baselines it.
    pub fn add_pointer(&mut self, id: PointerId, pointer_type: PointerType, position: Point) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pointers.insert(
            id,
            Pointer {
                id,
                pointer_type,
                start: position,
                last: position,
                seq,
            },
        );
    }

    /// Move a tracked pointer. Returns the delta since its previous position.
    pub fn update_pointer(&mut self, id: PointerId, position: Point) -> Option<Vec2> {
        let pointer = self.pointers.get_mut(&id)?;
        let delta = position - pointer.last;
        pointer.last = position;
        Some(delta)
    }

    pub fn remove_pointer(&mut self, id: PointerId) -> Option<Pointer> {
        self.pointers.remove(&id)
    }

    pub fn get_pointer(&self, id: PointerId) -> Option<&Pointer> {
        self.pointers.get(&id)
    }

    /// All active pointers, oldest first.
    pub fn get_all_pointers(&self) -> Vec<Pointer> {
        let mut pointers: Vec<Pointer> = self.pointers.values().copied().collect();
        pointers.sort_by_key(|p| p.seq);
        pointers
    }

    pub fn get_pointer_count(&self) -> usize {
        self.pointers.len()
    }

    /// Exactly two pointers are down and the newest is a touch.
    pub fn is_pinch_gesture(&self) -> bool {
        if self.pointers.len() != 2 {
            return false;
        }
        self.pointers
            .values()
            .max_by_key(|p| p.seq)
            .is_some_and(|p| p.pointer_type == PointerType::Touch)
    }

    /// Distance between the two active pointers, if exactly two are down.
    pub fn pinch_distance(&self) -> Option<f64> {
        match self.get_all_pointers().as_slice() {
            [a, b] => Some(a.last.distance(b.last)),
            _ => None,
        }
    }

    /// Slop threshold for a pointer type.
    pub fn slop_for(&self, pointer_type: PointerType) -> f64 {
        match pointer_type {
            PointerType::Mouse => self.slop.mouse,
            PointerType::Pen => self.slop.pen,
            PointerType::Touch => self.slop.touch,
        }
    }

    /// Whether the pointer has moved past its slop threshold since start.
    pub fn exceeds_drag_slop(&self, id: PointerId) -> bool {
        self.pointers
            .get(&id)
            .is_some_and(|p| p.displacement().hypot() > self.slop_for(p.pointer_type))
    }

    /// Make the pointer's current position its new start.
    pub fn reset_pointer_start(&mut self, id: PointerId) {
        if let Some(pointer) = self.pointers.get_mut(&id) {
            pointer.start = pointer.last;
        }
    }
}
