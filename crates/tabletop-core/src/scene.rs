//! Visual layer handed to the rendering backend.
//!
//! The scene is a retained display list: one drawable per mirrored object
//! plus the local marquee. Ghosts and remote cursors are owned by the
//! managers that create them and merged in by the engine when it builds the
//! display list.

use std::collections::HashMap;

use kurbo::{Point, Rect, Size};
use peniko::Color;

use crate::object::{ObjectId, ObjectKind};

/// Selection highlight and marquee color.
pub const SELECTION_COLOR: Color = Color::from_rgba8(59, 130, 246, 255);
/// Translucent marquee fill.
pub const MARQUEE_FILL: Color = Color::from_rgba8(59, 130, 246, 40);

/// Per-frame visual flags passed to a kind's `render`.
#[derive(Debug, Clone)]
pub struct VisualState {
    pub selected: bool,
    pub hovered: bool,
    /// Opacity in `0.0..=1.0`.
    pub alpha: f32,
    pub tint: Option<Color>,
}

impl Default for VisualState {
    fn default() -> Self {
        Self {
            selected: false,
            hovered: false,
            alpha: 1.0,
            tint: None,
        }
    }
}

impl VisualState {
    /// A semi-transparent ghost look.
    pub fn ghost(alpha: f32, tint: Option<Color>) -> Self {
        Self {
            alpha,
            tint,
            ..Self::default()
        }
    }
}

/// One renderable item. Positions are world coordinates, rotation is degrees.
#[derive(Debug, Clone)]
pub struct Drawable {
    pub object_id: Option<ObjectId>,
    pub kind: ObjectKind,
    pub center: Point,
    pub size: Size,
    pub rotation: f64,
    pub alpha: f32,
    pub tint: Option<Color>,
    pub highlighted: bool,
    pub label: Option<String>,
}

impl Drawable {
    /// Move the drawable to a new center and rotation.
    pub fn place(&mut self, center: Point, rotation: f64) {
        self.center = center;
        self.rotation = rotation;
    }

    /// Axis-aligned bounds of the rotated footprint.
    pub fn bounds(&self) -> Rect {
        rotated_bounds(self.center, self.size, self.rotation)
    }
}

/// Axis-aligned bounding box of a `size` rectangle centered on `center`
/// and rotated by `rotation_degrees`.
pub fn rotated_bounds(center: Point, size: Size, rotation_degrees: f64) -> Rect {
    let (sin, cos) = rotation_degrees.to_radians().sin_cos();
    let half_w = (size.width * cos.abs() + size.height * sin.abs()) / 2.0;
    let half_h = (size.width * sin.abs() + size.height * cos.abs()) / 2.0;
    Rect::new(center.x - half_w, center.y - half_h, center.x + half_w, center.y + half_h)
}

/// A mirrored object's retained visual.
#[derive(Debug, Clone)]
pub struct ObjectVisual {
    pub drawable: Drawable,
    pub sort_key: String,
    pub visible: bool,
}

/// A remote peer's cursor marker.
#[derive(Debug, Clone)]
pub struct CursorVisual {
    pub client_id: u64,
    pub position: Point,
    pub label: String,
    pub color: Color,
}

/// A translucent rectangle (local marquee or a peer's lasso).
#[derive(Debug, Clone)]
pub struct MarqueeVisual {
    pub rect: Rect,
    pub fill: Color,
    pub border: Color,
}

impl MarqueeVisual {
    pub fn new(rect: Rect, border: Color) -> Self {
        Self {
            rect,
            fill: border.multiply_alpha(0.15),
            border,
        }
    }
}

/// An item of the composed display list, back to front.
#[derive(Debug, Clone, Copy)]
pub enum DisplayItem<'a> {
    Object(&'a Drawable),
    Ghost(&'a Drawable),
    Marquee(&'a MarqueeVisual),
    Cursor(&'a CursorVisual),
}

/// Retained visuals for mirrored objects plus the local marquee.
#[derive(Debug, Default)]
pub struct Scene {
    objects: HashMap<ObjectId, ObjectVisual>,
    marquee: Option<MarqueeVisual>,
    redraw_requested: bool,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object's drawable. Visibility is preserved.
    pub fn upsert_object(&mut self, id: ObjectId, drawable: Drawable, sort_key: String) {
        let visible = self.objects.get(&id).is_none_or(|v| v.visible);
        self.objects.insert(
            id,
            ObjectVisual {
                drawable,
                sort_key,
                visible,
            },
        );
        self.request_redraw();
    }

    pub fn remove_object(&mut self, id: &ObjectId) -> Option<ObjectVisual> {
        let removed = self.objects.remove(id);
        if removed.is_some() {
            self.request_redraw();
        }
        removed
    }

    pub fn clear_objects(&mut self) {
        self.objects.clear();
        self.request_redraw();
    }

    pub fn object(&self, id: &ObjectId) -> Option<&ObjectVisual> {
        self.objects.get(id)
    }

    /// Move an existing visual. Returns false if there is none.
    pub fn place_object(&mut self, id: &ObjectId, center: Point, rotation: f64) -> bool {
        match self.objects.get_mut(id) {
            Some(visual) => {
                visual.drawable.place(center, rotation);
                self.redraw_requested = true;
                true
            }
            None => false,
        }
    }

    /// Show or hide an object's real visual. Returns false if there is none.
    pub fn set_object_visible(&mut self, id: &ObjectId, visible: bool) -> bool {
        match self.objects.get_mut(id) {
            Some(visual) => {
                if visual.visible != visible {
                    visual.visible = visible;
                    self.redraw_requested = true;
                }
                true
            }
            None => false,
        }
    }

    pub fn is_object_visible(&self, id: &ObjectId) -> bool {
        self.objects.get(id).is_some_and(|v| v.visible)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn set_marquee(&mut self, marquee: Option<MarqueeVisual>) {
        self.marquee = marquee;
        self.request_redraw();
    }

    pub fn marquee(&self) -> Option<&MarqueeVisual> {
        self.marquee.as_ref()
    }

    /// Visible object drawables, back to front.
    pub fn visible_objects(&self) -> Vec<&Drawable> {
        let mut visuals: Vec<&ObjectVisual> = self.objects.values().filter(|v| v.visible).collect();
        visuals.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
        visuals.into_iter().map(|v| &v.drawable).collect()
    }

    pub fn request_redraw(&mut self) {
        self.redraw_requested = true;
    }

    /// Drain the redraw flag.
    pub fn take_redraw_request(&mut self) -> bool {
        std::mem::take(&mut self.redraw_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drawable(id: &str) -> Drawable {
        Drawable {
            object_id: Some(ObjectId::from(id)),
            kind: ObjectKind::Token,
            center: Point::ZERO,
            size: Size::new(10.0, 10.0),
            rotation: 0.0,
            alpha: 1.0,
            tint: None,
            highlighted: false,
            label: None,
        }
    }

    #[test]
    fn test_rotated_bounds() {
        let upright = rotated_bounds(Point::new(0.0, 0.0), Size::new(20.0, 10.0), 0.0);
        assert!((upright.width() - 20.0).abs() < 1e-9);
        let turned = rotated_bounds(Point::new(0.0, 0.0), Size::new(20.0, 10.0), 90.0);
        assert!((turned.width() - 10.0).abs() < 1e-9);
        assert!((turned.height() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_visibility_survives_upsert() {
        let mut scene = Scene::new();
        let id = ObjectId::from("a");
        scene.upsert_object(id.clone(), drawable("a"), "0|a".into());
        assert!(scene.set_object_visible(&id, false));
        scene.upsert_object(id.clone(), drawable("a"), "0|b".into());
        assert!(!scene.is_object_visible(&id));
        assert!(!scene.set_object_visible(&ObjectId::from("missing"), true));
    }

    #[test]
    fn test_visible_objects_in_sort_order() {
        let mut scene = Scene::new();
        scene.upsert_object(ObjectId::from("top"), drawable("top"), "0|c".into());
        scene.upsert_object(ObjectId::from("bottom"), drawable("bottom"), "0|a".into());
        scene.upsert_object(ObjectId::from("hidden"), drawable("hidden"), "0|b".into());
        scene.set_object_visible(&ObjectId::from("hidden"), false);

        let order: Vec<String> = scene
            .visible_objects()
            .iter()
            .filter_map(|d| d.object_id.as_ref().map(|id| id.to_string()))
            .collect();
        assert_eq!(order, vec!["bottom", "top"]);
    }

    #[test]
    fn test_redraw_flag_drains() {
        let mut scene = Scene::new();
        assert!(!scene.take_redraw_request());
        scene.upsert_object(ObjectId::from("a"), drawable("a"), "0|a".into());
        assert!(scene.take_redraw_request());
        assert!(!scene.take_redraw_request());
    }
}
