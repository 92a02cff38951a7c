//! Inbound and outbound message unions.
//!
//! Both are internally tagged JSON (`{"type": "pointer_down", ...}`) so any
//! transport that can move a line of JSON can carry them.

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

use crate::awareness::AwarenessUpdate;
use crate::drag::{MovedObject, SecondaryOffset};
use crate::gesture::{Modifiers, PointerId, PointerType};
use crate::marquee::InteractionMode;
use crate::object::{ObjectId, Pose, SpatialObject};

/// Common payload of every pointer message. Coordinates are screen space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerInput {
    pub pointer_id: PointerId,
    #[serde(default)]
    pub pointer_type: PointerType,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default = "default_primary")]
    pub is_primary: bool,
}

fn default_primary() -> bool {
    true
}

impl PointerInput {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Host → engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    PointerDown(PointerInput),
    PointerMove(PointerInput),
    PointerUp(PointerInput),
    PointerCancel(PointerInput),
    PointerLeave(PointerInput),
    Wheel {
        delta_y: f64,
        x: f64,
        y: f64,
    },
    SetInteractionMode {
        mode: InteractionMode,
    },
    SetGridSnapEnabled {
        enabled: bool,
    },
    /// Full resync: replaces the whole mirror.
    ObjectsSync {
        objects: Vec<SpatialObject>,
    },
    ObjectsAdded {
        objects: Vec<SpatialObject>,
    },
    ObjectsUpdated {
        objects: Vec<SpatialObject>,
    },
    ObjectsRemoved {
        ids: Vec<ObjectId>,
    },
    AwarenessUpdate {
        updates: Vec<AwarenessUpdate>,
    },
    RequestScreenCoords {
        request_id: u64,
        ids: Vec<ObjectId>,
    },
    Flush {
        request_id: u64,
    },
    Resize {
        width: f64,
        height: f64,
        #[serde(default = "default_device_pixel_ratio")]
        device_pixel_ratio: f64,
    },
}

fn default_device_pixel_ratio() -> f64 {
    1.0
}

/// Screen-space rectangle of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRect {
    pub id: ObjectId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ScreenRect {
    pub fn new(id: ObjectId, rect: Rect) -> Self {
        Self {
            id,
            x: rect.x0,
            y: rect.y0,
            width: rect.width(),
            height: rect.height(),
        }
    }
}

/// Engine → host, store, and peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Final poses to commit to the store.
    ObjectsMoved {
        objects: Vec<MovedObject>,
    },
    ObjectsSelected {
        ids: Vec<ObjectId>,
        screen_rects: Vec<ScreenRect>,
    },
    ObjectsUnselected {
        ids: Vec<ObjectId>,
    },
    /// Local cursor in world coordinates.
    CursorPosition {
        x: f64,
        y: f64,
    },
    DragStateUpdate {
        gesture_id: String,
        primary_id: ObjectId,
        primary: Pose,
        secondary: Vec<SecondaryOffset>,
    },
    DragStateClear,
    AwarenessUpdateRate {
        hz: f64,
    },
    PanStarted,
    PanEnded,
    ZoomStarted,
    ZoomEnded,
    ObjectDragStarted {
        gesture_id: String,
        ids: Vec<ObjectId>,
        unstack: bool,
    },
    ObjectDragEnded {
        gesture_id: String,
    },
    ScreenCoords {
        request_id: u64,
        coords: Vec<ScreenRect>,
        /// Requested ids that never showed up before the wait ran out.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing: Vec<ObjectId>,
    },
    Flushed {
        request_id: u64,
        settled: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_message_defaults() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type": "pointer_down", "pointer_id": 1, "x": 4.0, "y": 5.0}"#).unwrap();
        let InboundMessage::PointerDown(input) = msg else {
            panic!("expected pointer_down, got {msg:?}");
        };
        assert_eq!(input.pointer_type, PointerType::Mouse);
        assert!(input.is_primary);
        assert!(!input.modifiers.multi_select());
        assert_eq!(input.position(), Point::new(4.0, 5.0));
    }

    #[test]
    fn test_inbound_tags() {
        let msg: InboundMessage = serde_json::from_str(r#"{"type": "set_interaction_mode", "mode": "select"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::SetInteractionMode {
                mode: InteractionMode::Select
            }
        );
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type": "resize", "width": 800.0, "height": 600.0}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Resize { device_pixel_ratio, .. } if device_pixel_ratio == 1.0));
    }

    #[test]
    fn test_objects_payload() {
        let json = r#"{"type": "objects_added", "objects": [
            {"id": "t1", "kind": "token", "position": {"x": 1.0, "y": 2.0, "rotation": 0.0}, "sort_key": "0|a"}
        ]}"#;
        let InboundMessage::ObjectsAdded { objects } = serde_json::from_str(json).unwrap() else {
            panic!("expected objects_added");
        };
        assert_eq!(objects[0].id, ObjectId::from("t1"));
        assert!(!objects[0].locked);
        assert!(objects[0].selected_by.is_none());
    }

    #[test]
    fn test_outbound_shape() {
        let json = serde_json::to_value(OutboundMessage::Flushed {
            request_id: 7,
            settled: true,
        })
        .unwrap();
        assert_eq!(json["type"], "flushed");
        assert_eq!(json["request_id"], 7);

        let json = serde_json::to_value(OutboundMessage::DragStateClear).unwrap();
        assert_eq!(json, serde_json::json!({"type": "drag_state_clear"}));
    }
}
