use std::collections::BTreeMap;

use crate::oracle::{BinaryMask, ObjectId, Point};

/// Per-frame object masks used for point hit-testing
///
/// Holds the latest mask for each (frame, object) pair. Within a frame,
/// objects keep the position they were first inserted at, so overlaps always
/// resolve to the object that appeared first.
#[derive(Debug, Default)]
pub struct MaskStore {
    frames: BTreeMap<usize, Vec<(ObjectId, BinaryMask)>>,
}

impl MaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record masks for a frame, replacing stale masks of the same objects
    pub fn record(&mut self, frame_idx: usize, masks: Vec<(ObjectId, BinaryMask)>) {
        let entries = self.frames.entry(frame_idx).or_default();
        for (object_id, mask) in masks {
            match entries.iter_mut().find(|(id, _)| *id == object_id) {
                Some(slot) => slot.1 = mask,
                None => entries.push((object_id, mask)),
            }
        }
    }

    /// First object whose mask covers `point`
    pub fn object_at(&self, frame_idx: usize, point: Point) -> Option<ObjectId> {
        let index = [point.y as usize, point.x as usize];
        self.frames
            .get(&frame_idx)?
            .iter()
            .find(|(_, mask)| mask.get(index).copied().unwrap_or(false))
            .map(|(id, _)| *id)
    }

    /// Objects stored for a frame, in hit-test order
    pub fn objects(&self, frame_idx: usize) -> Vec<ObjectId> {
        self.frames
            .get(&frame_idx)
            .map(|entries| entries.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    pub fn contains_frame(&self, frame_idx: usize) -> bool {
        self.frames.contains_key(&frame_idx)
    }

    /// Forget every frame after `frame_idx`
    pub fn truncate_after(&mut self, frame_idx: usize) {
        self.frames.retain(|&index, _| index <= frame_idx);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn mask(cells: &[(usize, usize)]) -> BinaryMask {
        let mut m = Array2::from_elem((4, 4), false);
        for &(y, x) in cells {
            m[[y, x]] = true;
        }
        m
    }

    #[test]
    fn test_empty_frame_has_no_object() {
        let store = MaskStore::new();
        assert_eq!(store.object_at(0, Point::new(0, 0)), None);
        assert_eq!(store.object_at(3, Point::new(2, 1)), None);
    }

    #[test]
    fn test_first_inserted_object_wins_overlap() {
        let mut store = MaskStore::new();
        store.record(1, vec![(5, mask(&[(2, 1)]))]);
        store.record(1, vec![(3, mask(&[(2, 1), (0, 0)]))]);

        assert_eq!(store.object_at(1, Point::new(1, 2)), Some(5));
        assert_eq!(store.object_at(1, Point::new(0, 0)), Some(3));
        assert_eq!(store.object_at(1, Point::new(3, 3)), None);
    }

    #[test]
    fn test_rerecord_replaces_mask_in_place() {
        let mut store = MaskStore::new();
        store.record(0, vec![(1, mask(&[(0, 0)])), (2, mask(&[(1, 1)]))]);
        store.record(0, vec![(1, mask(&[(1, 1)]))]);

        assert_eq!(store.objects(0), vec![1, 2]);
        assert_eq!(store.object_at(0, Point::new(0, 0)), None);
        assert_eq!(store.object_at(0, Point::new(1, 1)), Some(1));
    }

    #[test]
    fn test_truncate_after_keeps_prefix() {
        let mut store = MaskStore::new();
        for frame in 0..4 {
            store.record(frame, vec![(1, mask(&[(0, 0)]))]);
        }

        store.truncate_after(1);

        assert!(store.contains_frame(0));
        assert!(store.contains_frame(1));
        assert!(!store.contains_frame(2));
        assert!(!store.contains_frame(3));
    }
}
