//! Camera module for pan, wheel-zoom, and pinch-zoom.
//!
//! Zoom is unclamped: any finite positive scale is accepted. Every mutation
//! validates its inputs and keeps the last valid transform on bad numbers, so
//! one corrupt frame cannot poison the view.

use kurbo::{Point, Vec2};

use crate::config::EngineConfig;
use crate::coords::{Camera, CoordinateConverter};
use crate::error::{EngineError, EngineResult, ensure_finite};

/// Scale used when no valid scale is available to fall back on.
pub const MIN_SAFE_SCALE: f64 = 0.01;

/// Anchor locked at the start of a pinch gesture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinchAnchor {
    /// Screen midpoint between the two fingers at gesture start.
    pub screen_midpoint: Point,
    /// World point under that midpoint at gesture start.
    pub world_point: Point,
    /// Camera scale at gesture start.
    pub baseline_scale: f64,
    /// Finger distance at gesture start.
    pub initial_distance: f64,
}

/// Owns the camera transform and applies gestures to it.
#[derive(Debug, Clone)]
pub struct CameraManager {
    camera: Camera,
    converter: CoordinateConverter,
    zoom_in_factor: f64,
    zoom_out_factor: f64,
    pinch: Option<PinchAnchor>,
}

impl CameraManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            camera: Camera::default(),
            converter: CoordinateConverter::new(config.device_pixel_ratio),
            zoom_in_factor: config.zoom_in_factor,
            zoom_out_factor: config.zoom_out_factor,
            pinch: None,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn converter(&self) -> &CoordinateConverter {
        &self.converter
    }

    pub fn converter_mut(&mut self) -> &mut CoordinateConverter {
        &mut self.converter
    }

    pub fn scale(&self) -> f64 {
        self.camera.scale
    }

    pub fn screen_to_world(&self, screen: Point) -> Point {
        self.converter.screen_to_world(&self.camera, screen)
    }

    pub fn world_to_screen(&self, world: Point) -> Point {
        self.converter.world_to_screen(&self.camera, world)
    }

    /// Pan by a screen-space delta. Panning is not scaled.
    pub fn pan(&mut self, dx: f64, dy: f64) -> EngineResult<()> {
        let result = ensure_finite("pan.dx", dx).and_then(|_| ensure_finite("pan.dy", dy));
        if let Err(err) = result {
            log::warn!("Pan aborted: {err}");
            return Err(err);
        }
        self.camera.pan += Vec2::new(dx, dy);
        Ok(())
    }

    /// Apply one wheel step at `cursor`, keeping the world point under the
    /// cursor fixed. Positive `delta_y` zooms out.
    pub fn zoom(&mut self, delta_y: f64, cursor: Point) -> EngineResult<()> {
        let checked = ensure_finite("wheel.delta_y", delta_y)
            .and_then(|_| ensure_finite("wheel.x", cursor.x))
            .and_then(|_| ensure_finite("wheel.y", cursor.y));
        if let Err(err) = checked {
            log::warn!("Zoom aborted: {err}");
            return Err(err);
        }
        if delta_y == 0.0 {
            return Ok(());
        }

        // World point must be captured before the scale changes.
        let world_point = self.screen_to_world(cursor);
        let factor = if delta_y > 0.0 {
            self.zoom_out_factor
        } else {
            self.zoom_in_factor
        };
        self.apply_anchored(self.camera.scale * factor, cursor, world_point)
    }

    /// Lock the pinch anchor from the two active pointers.
    pub fn start_pinch(&mut self, a: Point, b: Point) -> EngineResult<PinchAnchor> {
        let screen_midpoint = a.midpoint(b);
        let initial_distance = a.distance(b);
        ensure_finite("pinch.midpoint.x", screen_midpoint.x)?;
        ensure_finite("pinch.midpoint.y", screen_midpoint.y)?;
        let anchor = PinchAnchor {
            screen_midpoint,
            world_point: self.screen_to_world(screen_midpoint),
            baseline_scale: self.camera.scale,
            initial_distance,
        };
        self.pinch = Some(anchor);
        Ok(anchor)
    }

    /// Rescale from the locked baseline by `current / initial` distance.
    pub fn update_pinch(&mut self, initial_distance: f64, current_distance: f64) -> EngineResult<()> {
        let Some(anchor) = self.pinch else {
            log::debug!("Pinch update without an active pinch");
            return Ok(());
        };
        let ratio = current_distance / initial_distance;
        if !ratio.is_finite() || ratio <= 0.0 {
            log::warn!("Pinch update aborted: distance ratio {current_distance}/{initial_distance}");
            return Err(EngineError::InvalidNumber {
                what: "pinch.ratio",
                value: ratio,
            });
        }
        self.apply_anchored(anchor.baseline_scale * ratio, anchor.screen_midpoint, anchor.world_point)
    }

    pub fn pinch_anchor(&self) -> Option<&PinchAnchor> {
        self.pinch.as_ref()
    }

    pub fn end_pinch(&mut self) -> Option<PinchAnchor> {
        self.pinch.take()
    }

    /// Set scale and recompute pan so `world_point` lands on `screen_point`.
    fn apply_anchored(&mut self, new_scale: f64, screen_point: Point, world_point: Point) -> EngineResult<()> {
        let scale = match self.validated_scale(new_scale) {
            Ok(scale) => scale,
            Err(err) => {
                log::warn!("Zoom aborted, keeping scale {}: {err}", self.camera.scale);
                return Err(err);
            }
        };
        let pan = Vec2::new(
            screen_point.x - world_point.x * scale,
            screen_point.y - world_point.y * scale,
        );
        if !pan.x.is_finite() || !pan.y.is_finite() {
            log::warn!("Zoom aborted, pan would be non-finite");
            return Err(EngineError::InvalidNumber {
                what: "camera.pan",
                value: if pan.x.is_finite() { pan.y } else { pan.x },
            });
        }
        self.camera = Camera { scale, pan };
        Ok(())
    }

    fn validated_scale(&mut self, candidate: f64) -> EngineResult<f64> {
        if candidate.is_finite() && candidate > 0.0 {
            return Ok(candidate);
        }
        if !(self.camera.scale.is_finite() && self.camera.scale > 0.0) {
            log::warn!("Camera scale {} invalid, resetting to {MIN_SAFE_SCALE}", self.camera.scale);
            self.camera.scale = MIN_SAFE_SCALE;
        }
        Err(EngineError::InvalidNumber {
            what: "camera.scale",
            value: candidate,
        })
    }
}
