//! Tabletop Core Library
//!
//! Interaction engine for a collaborative virtual tabletop: gestures, camera,
//! dragging, selection, grid-snap previews, and remote awareness, kept in
//! step with an external object store through plain messages.

pub mod awareness;
pub mod camera;
pub mod config;
pub mod coords;
pub mod drag;
pub mod engine;
pub mod error;
pub mod gesture;
pub mod grid_snap;
pub mod marquee;
pub mod messages;
pub mod object;
pub mod registry;
pub mod scene;
pub mod selection;
pub mod sort_key;
pub mod spatial;
pub mod transport;

pub use awareness::{AwarenessManager, AwarenessState, AwarenessUpdate, RateTracker};
pub use camera::CameraManager;
pub use config::{EngineConfig, SlopThresholds};
pub use coords::{Camera, CoordinateConverter};
pub use drag::{DragBroadcast, DragManager, MovedObject, SecondaryOffset};
pub use engine::Engine;
pub use error::{ConfigError, EngineError, EngineResult};
pub use gesture::{GestureRecognizer, Modifiers, PointerId, PointerType};
pub use grid_snap::{GridSnapManager, snap_to_grid};
pub use marquee::{InteractionMode, SelectionRectangleManager};
pub use messages::{InboundMessage, OutboundMessage, PointerInput, ScreenRect};
pub use object::{ObjectId, ObjectKind, ObjectMirror, Pose, SpatialObject};
pub use registry::{KindBehavior, KindRegistry};
pub use scene::{DisplayItem, Drawable, Scene, VisualState};
pub use selection::{SelectionDiff, SelectionManager};
pub use spatial::SpatialIndex;
pub use transport::{ResponseSink, VecSink};

/// Monotonic clock type accepted by [`Engine::handle_message`] and
/// [`Engine::tick`].
#[cfg(not(target_arch = "wasm32"))]
pub use std::time::Instant;
#[cfg(target_arch = "wasm32")]
pub use web_time::Instant;
