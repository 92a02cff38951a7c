//! Engine configuration.
//!
//! Every tunable constant of the interaction engine lives here so hosts can
//! override them from a JSON file. Missing fields fall back to defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Slop thresholds per pointer type, in device-independent pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlopThresholds {
    pub mouse: f64,
    pub pen: f64,
    pub touch: f64,
}

impl Default for SlopThresholds {
    fn default() -> Self {
        Self {
            mouse: 3.0,
            pen: 6.0,
            touch: 12.0,
        }
    }
}

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Actor id compared against `selected_by` on objects.
    pub actor_id: String,
    /// Client id this engine broadcasts awareness under (skipped on receipt).
    pub client_id: u64,
    /// Drag slop per pointer type.
    pub slop: SlopThresholds,
    /// Scale multiplier for one wheel step towards the user (zoom out).
    pub zoom_out_factor: f64,
    /// Scale multiplier for one wheel step away from the user (zoom in).
    pub zoom_in_factor: f64,
    /// Grid cell size used by grid-snap previews, in world units.
    pub grid_size: f64,
    /// Rolling window for awareness rate estimation.
    pub awareness_window_ms: u64,
    /// Minimum rate change before a new rate is reported.
    pub rate_report_min_delta_hz: f64,
    /// Minimum time between two rate reports.
    pub rate_report_min_interval_ms: u64,
    /// Delay after the last zoom delta before zoom-ended fires.
    pub zoom_end_debounce_ms: u64,
    /// Frames a bounded poll may wait before answering anyway.
    pub max_poll_frames: u32,
    /// Cell size of the spatial index buckets.
    pub spatial_cell_size: f64,
    /// Initial device pixel ratio.
    pub device_pixel_ratio: f64,
    /// Opacity of reconstructed remote drag ghosts.
    pub remote_ghost_alpha: f32,
    /// Opacity of local grid-snap ghosts.
    pub snap_ghost_alpha: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            actor_id: "local".to_string(),
            client_id: 0,
            slop: SlopThresholds::default(),
            zoom_out_factor: 0.95,
            zoom_in_factor: 1.05,
            grid_size: 50.0,
            awareness_window_ms: 1000,
            rate_report_min_delta_hz: 2.0,
            rate_report_min_interval_ms: 250,
            zoom_end_debounce_ms: 250,
            max_poll_frames: 120,
            spatial_cell_size: 256.0,
            device_pixel_ratio: 1.0,
            remote_ghost_alpha: 0.5,
            snap_ghost_alpha: 0.35,
        }
    }
}

impl EngineConfig {
    /// Create a configuration for the given local actor and awareness client.
    pub fn for_actor(actor_id: impl Into<String>, client_id: u64) -> Self {
        Self {
            actor_id: actor_id.into(),
            client_id,
            ..Self::default()
        }
    }

    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check that every numeric field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("slop.mouse", self.slop.mouse),
            ("slop.pen", self.slop.pen),
            ("slop.touch", self.slop.touch),
            ("zoom_out_factor", self.zoom_out_factor),
            ("zoom_in_factor", self.zoom_in_factor),
            ("grid_size", self.grid_size),
            ("spatial_cell_size", self.spatial_cell_size),
            ("device_pixel_ratio", self.device_pixel_ratio),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        if self.awareness_window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "awareness_window_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.slop.touch - 12.0).abs() < f64::EPSILON);
        assert!((config.zoom_in_factor - 1.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"actor_id": "alice", "grid_size": 25.0}"#).unwrap();
        assert_eq!(config.actor_id, "alice");
        assert!((config.grid_size - 25.0).abs() < f64::EPSILON);
        assert_eq!(config.zoom_end_debounce_ms, 250);
    }

    #[test]
    fn test_rejects_non_positive() {
        let err = EngineConfig::from_json(r#"{"grid_size": 0.0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "grid_size", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"client_id": 42, "slop": {{"mouse": 4.0}}}}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.client_id, 42);
        assert!((config.slop.mouse - 4.0).abs() < f64::EPSILON);
        assert!((config.slop.pen - 6.0).abs() < f64::EPSILON);
    }
}
