//! Uniform-grid spatial index for hit testing and range queries.
//!
//! Single writer: only the engine updates it. During an active drag the
//! dragged objects keep their pre-drag entries until the drag ends.
//! Objects covering more than [`MAX_CELLS_PER_ENTRY`] cells are kept in a
//! side list that every query scans.

use std::collections::{HashMap, HashSet};

use kurbo::{Point, Rect};

use crate::object::ObjectId;

type Cell = (i64, i64);

/// Largest number of grid cells one entry is bucketed into.
pub const MAX_CELLS_PER_ENTRY: u128 = 4096;

#[derive(Debug, Clone)]
struct Entry {
    bounds: Rect,
    sort_key: String,
}

/// Bucketed index over world-space bounds.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    cells: HashMap<Cell, HashSet<ObjectId>>,
    oversized: HashSet<ObjectId>,
    entries: HashMap<ObjectId, Entry>,
}

fn overlaps(a: &Rect, b: &Rect) -> bool {
    a.x0 <= b.x1 && a.x1 >= b.x0 && a.y0 <= b.y1 && a.y1 >= b.y0
}

impl SpatialIndex {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: if cell_size.is_finite() && cell_size > 0.0 { cell_size } else { 256.0 },
            cells: HashMap::new(),
            oversized: HashSet::new(),
            entries: HashMap::new(),
        }
    }

    fn cell_range(&self, rect: &Rect) -> (Cell, Cell) {
        let lo = (
            (rect.x0 / self.cell_size).floor() as i64,
            (rect.y0 / self.cell_size).floor() as i64,
        );
        let hi = (
            (rect.x1 / self.cell_size).floor() as i64,
            (rect.y1 / self.cell_size).floor() as i64,
        );
        (lo, hi)
    }

    fn cell_count(lo: Cell, hi: Cell) -> u128 {
        let w = hi.0.abs_diff(lo.0) as u128 + 1;
        let h = hi.1.abs_diff(lo.1) as u128 + 1;
        w * h
    }

    /// Insert or move an object.
    pub fn insert(&mut self, id: ObjectId, bounds: Rect, sort_key: String) {
        if ![bounds.x0, bounds.y0, bounds.x1, bounds.y1].iter().all(|v| v.is_finite()) {
            log::warn!("Not indexing {id}: non-finite bounds {bounds:?}");
            self.remove(&id);
            return;
        }
        self.remove(&id);
        let bounds = bounds.abs();
        let (lo, hi) = self.cell_range(&bounds);
        if Self::cell_count(lo, hi) > MAX_CELLS_PER_ENTRY {
            log::debug!("Indexing {id} as oversized: {bounds:?}");
            self.oversized.insert(id.clone());
        } else {
            for cx in lo.0..=hi.0 {
                for cy in lo.1..=hi.1 {
                    self.cells.entry((cx, cy)).or_default().insert(id.clone());
                }
            }
        }
        self.entries.insert(id, Entry { bounds, sort_key });
    }

    pub fn remove(&mut self, id: &ObjectId) -> bool {
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        if self.oversized.remove(id) {
            return true;
        }
        let (lo, hi) = self.cell_range(&entry.bounds);
        for cx in lo.0..=hi.0 {
            for cy in lo.1..=hi.1 {
                if let Some(cell) = self.cells.get_mut(&(cx, cy)) {
                    cell.remove(id);
                    if cell.is_empty() {
                        self.cells.remove(&(cx, cy));
                    }
                }
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.oversized.clear();
        self.entries.clear();
    }

    pub fn bounds(&self, id: &ObjectId) -> Option<Rect> {
        self.entries.get(id).map(|e| e.bounds)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn candidates(&self, rect: &Rect) -> HashSet<&ObjectId> {
        let (lo, hi) = self.cell_range(rect);
        if Self::cell_count(lo, hi) > self.entries.len() as u128 {
            return self.entries.keys().collect();
        }
        let mut found: HashSet<&ObjectId> = self.oversized.iter().collect();
        for cx in lo.0..=hi.0 {
            for cy in lo.1..=hi.1 {
                if let Some(cell) = self.cells.get(&(cx, cy)) {
                    found.extend(cell.iter());
                }
            }
        }
        found
    }

    fn sorted(&self, mut ids: Vec<&ObjectId>) -> Vec<ObjectId> {
        ids.sort_by(|a, b| {
            let ka = &self.entries[*a].sort_key;
            let kb = &self.entries[*b].sort_key;
            ka.cmp(kb).then_with(|| a.cmp(b))
        });
        ids.into_iter().cloned().collect()
    }

    /// Objects whose bounds overlap `rect`, back to front.
    pub fn query_rect(&self, rect: Rect) -> Vec<ObjectId> {
        let rect = rect.abs();
        let hits: Vec<&ObjectId> = self
            .candidates(&rect)
            .into_iter()
            .filter(|id| overlaps(&self.entries[*id].bounds, &rect))
            .collect();
        self.sorted(hits)
    }

    /// Objects containing `point`, front to back.
    pub fn query_point(&self, point: Point) -> Vec<ObjectId> {
        let at = Rect::from_points(point, point);
        let mut hits = self.query_rect(at);
        hits.reverse();
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(items: &[(&str, Rect, &str)]) -> SpatialIndex {
        let mut index = SpatialIndex::new(100.0);
        for (id, rect, key) in items {
            index.insert(ObjectId::from(*id), *rect, key.to_string());
        }
        index
    }

    #[test]
    fn test_point_query_front_to_back() {
        let index = index_with(&[
            ("low", Rect::new(0.0, 0.0, 50.0, 50.0), "0|a"),
            ("high", Rect::new(25.0, 25.0, 75.0, 75.0), "0|b"),
        ]);
        let hits = index.query_point(Point::new(30.0, 30.0));
        assert_eq!(hits, vec![ObjectId::from("high"), ObjectId::from("low")]);
        assert!(index.query_point(Point::new(90.0, 90.0)).is_empty());
    }

    #[test]
    fn test_rect_query_spans_cells() {
        let index = index_with(&[
            ("a", Rect::new(-150.0, -150.0, -120.0, -120.0), "0|a"),
            ("b", Rect::new(380.0, 10.0, 420.0, 40.0), "0|b"),
            ("c", Rect::new(1000.0, 1000.0, 1010.0, 1010.0), "0|c"),
        ]);
        let hits = index.query_rect(Rect::new(-200.0, -200.0, 400.0, 400.0));
        assert_eq!(hits, vec![ObjectId::from("a"), ObjectId::from("b")]);
    }

    #[test]
    fn test_reinsert_moves_object() {
        let mut index = index_with(&[("a", Rect::new(0.0, 0.0, 10.0, 10.0), "0|a")]);
        index.insert(ObjectId::from("a"), Rect::new(500.0, 500.0, 510.0, 510.0), "0|a".into());
        assert!(index.query_point(Point::new(5.0, 5.0)).is_empty());
        assert_eq!(index.query_point(Point::new(505.0, 505.0)).len(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_huge_query_falls_back_to_scan() {
        let index = index_with(&[("a", Rect::new(0.0, 0.0, 10.0, 10.0), "0|a")]);
        let hits = index.query_rect(Rect::new(-1e12, -1e12, 1e12, 1e12));
        assert_eq!(hits, vec![ObjectId::from("a")]);
    }

    #[test]
    fn test_oversized_entry_is_scanned() {
        let mut index = index_with(&[("token", Rect::new(0.0, 0.0, 10.0, 10.0), "0|b")]);
        let mat = ObjectId::from("mat");
        index.insert(mat.clone(), Rect::new(-5e8, -5e8, 5e8, 5e8), "0|a".into());
        assert_eq!(index.len(), 2);

        let hits = index.query_point(Point::new(5.0, 5.0));
        assert_eq!(hits, vec![ObjectId::from("token"), mat.clone()]);
        assert_eq!(index.query_point(Point::new(1e8, -3e8)), vec![mat.clone()]);

        index.insert(mat.clone(), Rect::new(1000.0, 1000.0, 1010.0, 1010.0), "0|a".into());
        assert!(index.query_point(Point::new(1e8, -3e8)).is_empty());
        assert!(index.remove(&mat));
        assert!(index.query_point(Point::new(1005.0, 1005.0)).is_empty());
    }

    #[test]
    fn test_saturated_bounds_do_not_hang() {
        let mut index = SpatialIndex::new(100.0);
        index.insert(ObjectId::from("wide"), Rect::new(-1e30, -1e30, 1e30, 1e30), "0|a".into());
        assert_eq!(index.query_point(Point::ZERO), vec![ObjectId::from("wide")]);
        assert!(index.remove(&ObjectId::from("wide")));
        assert!(index.is_empty());
    }

    #[test]
    fn test_non_finite_bounds_rejected() {
        let mut index = SpatialIndex::new(100.0);
        index.insert(ObjectId::from("bad"), Rect::new(f64::NAN, 0.0, 1.0, 1.0), "0|a".into());
        assert!(index.is_empty());
        assert!(!index.remove(&ObjectId::from("bad")));
    }
}
