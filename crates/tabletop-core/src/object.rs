//! Spatial objects and the local mirror of the authoritative store.

use std::collections::HashMap;
use std::fmt;

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

/// Identifier of an object in the external store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kinds of objects that live on the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Stack,
    Token,
    Zone,
    Mat,
    Counter,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::Stack,
        ObjectKind::Token,
        ObjectKind::Zone,
        ObjectKind::Mat,
        ObjectKind::Counter,
    ];
}

/// World-space pose: center position plus rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub rotation: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, rotation: f64) -> Self {
        Self { x, y, rotation }
    }

    /// Position as a point.
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// This pose moved by `delta`, rotation unchanged.
    pub fn translated(&self, delta: Vec2) -> Self {
        Self {
            x: self.x + delta.x,
            y: self.y + delta.y,
            rotation: self.rotation,
        }
    }

    /// Whether every component is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.rotation.is_finite()
    }
}

/// An object as mirrored from the external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub position: Pose,
    /// Fractional index; lexicographic order is z-order.
    pub sort_key: String,
    /// Back-reference to a containing object, not ownership.
    #[serde(default)]
    pub container_id: Option<ObjectId>,
    #[serde(default)]
    pub locked: bool,
    /// Actor currently holding the selection, exclusive.
    #[serde(default)]
    pub selected_by: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl SpatialObject {
    /// Create an unlocked, unselected object.
    pub fn new(id: impl Into<ObjectId>, kind: ObjectKind, position: Pose, sort_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            position,
            sort_key: sort_key.into(),
            container_id: None,
            locked: false,
            selected_by: None,
            meta: serde_json::Map::new(),
        }
    }

    /// Read a numeric entry from the meta bag.
    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.meta.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Read a string entry from the meta bag.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Read-mostly mirror of the external object store.
///
/// The engine writes to it optimistically (drag positions, selection, sort
/// keys); the store's echoes overwrite those writes.
#[derive(Debug, Clone, Default)]
pub struct ObjectMirror {
    objects: HashMap<ObjectId, SpatialObject>,
}

impl ObjectMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mirror with a full store snapshot.
    pub fn replace_all(&mut self, objects: Vec<SpatialObject>) {
        self.objects = objects.into_iter().map(|o| (o.id.clone(), o)).collect();
    }

    /// Insert or replace one object. Returns the previous value.
    pub fn upsert(&mut self, object: SpatialObject) -> Option<SpatialObject> {
        self.objects.insert(object.id.clone(), object)
    }

    /// Replace an existing object. Unknown ids are rejected.
    pub fn update(&mut self, object: SpatialObject) -> Result<(), SpatialObject> {
        match self.objects.get_mut(&object.id) {
            Some(existing) => {
                *existing = object;
                Ok(())
            }
            None => Err(object),
        }
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<SpatialObject> {
        self.objects.remove(id)
    }

    pub fn get(&self, id: &ObjectId) -> Option<&SpatialObject> {
        self.objects.get(id)
    }

    pub fn get_mut(&mut self, id: &ObjectId) -> Option<&mut SpatialObject> {
        self.objects.get_mut(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpatialObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The greatest sort key currently in the mirror.
    pub fn max_sort_key(&self) -> Option<&str> {
        self.objects.values().map(|o| o.sort_key.as_str()).max()
    }

    /// Sort ids by their objects' sort keys (back to front).
    /// Ids missing from the mirror are dropped.
    pub fn order_by_sort_key(&self, ids: &[ObjectId]) -> Vec<ObjectId> {
        let mut known: Vec<&SpatialObject> = ids.iter().filter_map(|id| self.objects.get(id)).collect();
        known.sort_by(|a, b| a.sort_key.cmp(&b.sort_key).then_with(|| a.id.cmp(&b.id)));
        known.into_iter().map(|o| o.id.clone()).collect()
    }
}
