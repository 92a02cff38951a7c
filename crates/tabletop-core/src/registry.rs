//! Per-kind behavior table.
//!
//! The registry is built by the host and lent to the engine. Each object kind
//! maps to a [`KindBehavior`] that knows the kind's footprint and how to turn
//! an object plus its visual state into a [`Drawable`].

use std::collections::HashMap;

use kurbo::{Rect, Size};

use crate::object::{ObjectKind, SpatialObject};
use crate::scene::{Drawable, VisualState, rotated_bounds};

/// Behavior of one object kind.
pub trait KindBehavior: Send + Sync {
    /// Footprint of the object in world units.
    fn footprint(&self, object: &SpatialObject) -> Size;

    /// Text drawn on the object, if any.
    fn label(&self, _object: &SpatialObject) -> Option<String> {
        None
    }

    /// Build the drawable for an object in a given visual state.
    fn render(&self, object: &SpatialObject, visual: &VisualState) -> Drawable {
        Drawable {
            object_id: Some(object.id.clone()),
            kind: object.kind,
            center: object.position.point(),
            size: self.footprint(object),
            rotation: object.position.rotation,
            alpha: visual.alpha,
            tint: visual.tint,
            highlighted: visual.selected || visual.hovered,
            label: self.label(object),
        }
    }
}

/// Fixed-size footprint, overridable through `meta.width` / `meta.height`.
#[derive(Debug, Clone, Copy)]
pub struct FootprintBehavior {
    pub size: Size,
}

impl FootprintBehavior {
    pub const fn new(width: f64, height: f64) -> Self {
        Self {
            size: Size::new(width, height),
        }
    }
}

fn meta_size(object: &SpatialObject, fallback: Size) -> Size {
    let pick = |key: &str, default: f64| {
        object
            .meta_f64(key)
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(default)
    };
    Size::new(pick("width", fallback.width), pick("height", fallback.height))
}

impl KindBehavior for FootprintBehavior {
    fn footprint(&self, object: &SpatialObject) -> Size {
        meta_size(object, self.size)
    }
}

/// Stacks show their card count.
#[derive(Debug, Clone, Copy)]
pub struct StackBehavior;

impl KindBehavior for StackBehavior {
    fn footprint(&self, object: &SpatialObject) -> Size {
        meta_size(object, Size::new(63.0, 88.0))
    }

    fn label(&self, object: &SpatialObject) -> Option<String> {
        object
            .meta
            .get("cards")
            .and_then(serde_json::Value::as_array)
            .map(|cards| cards.len().to_string())
    }
}

/// Counters show their current value.
#[derive(Debug, Clone, Copy)]
pub struct CounterBehavior;

impl KindBehavior for CounterBehavior {
    fn footprint(&self, object: &SpatialObject) -> Size {
        meta_size(object, Size::new(48.0, 48.0))
    }

    fn label(&self, object: &SpatialObject) -> Option<String> {
        object.meta.get("value").map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

static FALLBACK: FootprintBehavior = FootprintBehavior::new(50.0, 50.0);

/// Explicit kind → behavior table.
pub struct KindRegistry {
    behaviors: HashMap<ObjectKind, Box<dyn KindBehavior>>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl KindRegistry {
    /// An empty registry; unregistered kinds use a 50×50 footprint.
    pub fn empty() -> Self {
        Self {
            behaviors: HashMap::new(),
        }
    }

    /// A registry with behaviors for every built-in kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ObjectKind::Stack, StackBehavior);
        registry.register(ObjectKind::Token, FootprintBehavior::new(40.0, 40.0));
        registry.register(ObjectKind::Zone, FootprintBehavior::new(300.0, 200.0));
        registry.register(ObjectKind::Mat, FootprintBehavior::new(600.0, 400.0));
        registry.register(ObjectKind::Counter, CounterBehavior);
        registry
    }

    /// Register or replace the behavior for a kind.
    pub fn register(&mut self, kind: ObjectKind, behavior: impl KindBehavior + 'static) {
        self.behaviors.insert(kind, Box::new(behavior));
    }

    pub fn behavior(&self, kind: ObjectKind) -> &dyn KindBehavior {
        self.behaviors.get(&kind).map_or(&FALLBACK as &dyn KindBehavior, |b| b.as_ref())
    }

    pub fn render(&self, object: &SpatialObject, visual: &VisualState) -> Drawable {
        self.behavior(object.kind).render(object, visual)
    }

    /// World-space bounds of an object at its mirrored pose.
    pub fn bounds(&self, object: &SpatialObject) -> Rect {
        let size = self.behavior(object.kind).footprint(object);
        rotated_bounds(object.position.point(), size, object.position.rotation)
    }
}
