//! Derived cache of the objects selected by the local actor.
//!
//! The cache is never authoritative: it is rebuilt from every object's
//! `selected_by` field and can always be thrown away and re-derived.

use std::collections::HashSet;

use crate::object::{ObjectId, SpatialObject};

/// Membership change produced by a resync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionDiff {
    pub added: Vec<ObjectId>,
    pub removed: Vec<ObjectId>,
}

impl SelectionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Local selection cache plus the pending-intent counter.
#[derive(Debug, Clone)]
pub struct SelectionManager {
    actor_id: String,
    selected: HashSet<ObjectId>,
    pending_ops: u32,
}

impl SelectionManager {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            selected: HashSet::new(),
            pending_ops: 0,
        }
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Rebuild from a store-originated change and settle one pending intent.
    ///
    /// The counter drops even when membership did not change: re-selecting an
    /// already selected object still completes its round trip.
    pub fn sync_from_store<'a>(&mut self, objects: impl IntoIterator<Item = &'a SpatialObject>) -> SelectionDiff {
        let diff = self.rederive(objects);
        if self.pending_ops > 0 {
            self.pending_ops -= 1;
        }
        diff
    }

    /// Rebuild from the mirror without touching the pending counter.
    /// Used after optimistic local writes.
    pub fn rederive<'a>(&mut self, objects: impl IntoIterator<Item = &'a SpatialObject>) -> SelectionDiff {
        let next: HashSet<ObjectId> = objects
            .into_iter()
            .filter(|o| o.selected_by.as_deref() == Some(self.actor_id.as_str()))
            .map(|o| o.id.clone())
            .collect();

        let mut added: Vec<ObjectId> = next.difference(&self.selected).cloned().collect();
        let mut removed: Vec<ObjectId> = self.selected.difference(&next).cloned().collect();
        added.sort();
        removed.sort();

        self.selected = next;
        SelectionDiff { added, removed }
    }

    /// Record that a selection intent was sent to the store.
    pub fn begin_operation(&mut self) {
        self.pending_ops += 1;
    }

    pub fn pending_operations(&self) -> u32 {
        self.pending_ops
    }

    pub fn is_settled(&self) -> bool {
        self.pending_ops == 0
    }

    pub fn is_selected(&self, id: &ObjectId) -> bool {
        self.selected.contains(id)
    }

    /// Selected ids in stable order.
    pub fn selected_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.selected.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}
