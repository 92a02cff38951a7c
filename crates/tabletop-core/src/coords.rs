//! Screen, world, and device-pixel conversions.

use kurbo::{Affine, Point, Rect, Vec2};
use serde::{Deserialize, Serialize};

/// The view transform: world is scaled, then offset by `pan` in screen space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Zoom factor. Always finite and positive.
    pub scale: f64,
    /// Screen-space offset of the world origin.
    pub pan: Vec2,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            scale: 1.0,
            pan: Vec2::ZERO,
        }
    }
}

impl Camera {
    /// World to screen transform.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.pan) * Affine::scale(self.scale)
    }
}

/// Converts between screen (logical pixels), world, and canvas (physical
/// pixels) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateConverter {
    device_pixel_ratio: f64,
}

impl Default for CoordinateConverter {
    fn default() -> Self {
        Self { device_pixel_ratio: 1.0 }
    }
}

impl CoordinateConverter {
    pub fn new(device_pixel_ratio: f64) -> Self {
        let mut converter = Self::default();
        converter.set_device_pixel_ratio(device_pixel_ratio);
        converter
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    /// Update the device pixel ratio. Invalid values are ignored.
    pub fn set_device_pixel_ratio(&mut self, ratio: f64) {
        if ratio.is_finite() && ratio > 0.0 {
            self.device_pixel_ratio = ratio;
        } else {
            log::warn!("Ignoring invalid device pixel ratio {ratio}");
        }
    }

    /// `(screen - pan) / scale`
    pub fn screen_to_world(&self, camera: &Camera, screen: Point) -> Point {
        Point::new(
            (screen.x - camera.pan.x) / camera.scale,
            (screen.y - camera.pan.y) / camera.scale,
        )
    }

    /// `world * scale + pan`
    pub fn world_to_screen(&self, camera: &Camera, world: Point) -> Point {
        Point::new(
            world.x * camera.scale + camera.pan.x,
            world.y * camera.scale + camera.pan.y,
        )
    }

    /// Map a world rectangle to screen space.
    pub fn world_rect_to_screen(&self, camera: &Camera, rect: Rect) -> Rect {
        Rect::from_points(
            self.world_to_screen(camera, Point::new(rect.x0, rect.y0)),
            self.world_to_screen(camera, Point::new(rect.x1, rect.y1)),
        )
    }

    /// Physical canvas pixels to logical DOM pixels.
    pub fn canvas_to_dom(&self, canvas: Point) -> Point {
        Point::new(canvas.x / self.device_pixel_ratio, canvas.y / self.device_pixel_ratio)
    }

    /// Logical DOM pixels to physical canvas pixels.
    pub fn dom_to_canvas(&self, dom: Point) -> Point {
        Point::new(dom.x * self.device_pixel_ratio, dom.y * self.device_pixel_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_to_world_identity() {
        let converter = CoordinateConverter::default();
        let world = converter.screen_to_world(&Camera::default(), Point::new(100.0, 200.0));
        assert!((world.x - 100.0).abs() < f64::EPSILON);
        assert!((world.y - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_screen_to_world_with_pan_and_scale() {
        let converter = CoordinateConverter::default();
        let camera = Camera {
            scale: 2.0,
            pan: Vec2::new(50.0, 100.0),
        };
        let world = converter.screen_to_world(&camera, Point::new(150.0, 300.0));
        assert!((world.x - 50.0).abs() < f64::EPSILON);
        assert!((world.y - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_roundtrip_conversion() {
        let converter = CoordinateConverter::default();
        let camera = Camera {
            scale: 1.5,
            pan: Vec2::new(30.0, -20.0),
        };
        let original = Point::new(123.0, 456.0);
        let back = converter.world_to_screen(&camera, converter.screen_to_world(&camera, original));
        assert!((back.x - original.x).abs() < 1e-10);
        assert!((back.y - original.y).abs() < 1e-10);
    }

    #[test]
    fn test_transform_matches_world_to_screen() {
        let converter = CoordinateConverter::default();
        let camera = Camera {
            scale: 0.75,
            pan: Vec2::new(12.0, 7.0),
        };
        let world = Point::new(40.0, -8.0);
        let a = camera.transform() * world;
        let b = converter.world_to_screen(&camera, world);
        assert!((a - b).hypot() < 1e-10);
    }

    #[test]
    fn test_device_pixel_ratio() {
        let mut converter = CoordinateConverter::new(2.0);
        assert_eq!(converter.dom_to_canvas(Point::new(10.0, 20.0)), Point::new(20.0, 40.0));
        assert_eq!(converter.canvas_to_dom(Point::new(20.0, 40.0)), Point::new(10.0, 20.0));

        converter.set_device_pixel_ratio(f64::NAN);
        assert!((converter.device_pixel_ratio() - 2.0).abs() < f64::EPSILON);
        converter.set_device_pixel_ratio(0.0);
        assert!((converter.device_pixel_ratio() - 2.0).abs() < f64::EPSILON);
    }
}
