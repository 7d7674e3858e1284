//! Sparse per-frame anchor store.
//!
//! Only pinned frames carry a value; everything else is interpolated on read from the
//! nearest pinned neighbours within [`SCAN_LIMIT`] frames.

use std::collections::VecDeque;

use crate::core::Anchor;

/// How far `get` looks in each direction for a pinned neighbour.
pub const SCAN_LIMIT: usize = 100;
pub const UNDO_DEPTH: usize = 100;
/// Half-width of the box filter used by [`Timeline::smoothed`].
pub const SMOOTHING_RADIUS: i64 = 2;

/// Prior entries of a contiguous range, captured before a destructive edit.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoRecord {
    pub start: usize,
    pub prior: Vec<Option<Anchor>>,
}

impl UndoRecord {
    pub fn end(&self) -> usize {
        self.start + self.prior.len()
    }
}

#[derive(Clone, Debug)]
pub struct Timeline {
    entries: Vec<Option<Anchor>>,
    default: Anchor,
    undo: VecDeque<UndoRecord>,
}

impl Timeline {
    pub fn new(len: usize, default: Anchor) -> Self {
        Self::from_entries(vec![None; len], default)
    }

    pub fn from_entries(entries: Vec<Option<Anchor>>, default: Anchor) -> Self {
        Self {
            entries,
            default,
            undo: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn default_anchor(&self) -> Anchor {
        self.default
    }

    pub fn entries(&self) -> &[Option<Anchor>] {
        &self.entries
    }

    /// The pinned value at `index`, without interpolation.
    pub fn entry(&self, index: i64) -> Option<Anchor> {
        self.slot(index).and_then(|i| self.entries[i])
    }

    pub fn keyframe_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn last_keyframe(&self) -> Option<usize> {
        self.entries.iter().rposition(Option::is_some)
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    fn slot(&self, index: i64) -> Option<usize> {
        usize::try_from(index).ok().filter(|&i| i < self.entries.len())
    }

    /// Anchor for `index`: pinned value, interpolation between the nearest pinned
    /// neighbours, the single nearby one, or the default.
    pub fn get(&self, index: i64) -> Anchor {
        let Some(i) = self.slot(index) else {
            return self.default;
        };
        if let Some(a) = self.entries[i] {
            return a;
        }

        let prev = self.scan_back(i);
        let next = self.scan_forward(i);
        match (prev, next) {
            (None, None) => self.default,
            (Some((_, a)), None) | (None, Some((_, a))) => a,
            (Some((p, u)), Some((n, v))) => {
                let alpha = (i - p) as f64 / (n - p) as f64;
                // The 0.5 bias is long-standing behaviour that saved keyframe files rely on.
                Anchor::new(
                    0.5 + u.x + alpha * (v.x - u.x),
                    0.5 + u.y + alpha * (v.y - u.y),
                )
            }
        }
    }

    fn scan_back(&self, i: usize) -> Option<(usize, Anchor)> {
        let lo = i.saturating_sub(SCAN_LIMIT);
        (lo..i)
            .rev()
            .find_map(|j| self.entries[j].map(|a| (j, a)))
    }

    fn scan_forward(&self, i: usize) -> Option<(usize, Anchor)> {
        let hi = (i + 1 + SCAN_LIMIT).min(self.entries.len());
        (i + 1..hi).find_map(|j| self.entries[j].map(|a| (j, a)))
    }

    /// Unweighted mean of `get` over `index - 2 ..= index + 2`.
    pub fn smoothed(&self, index: i64) -> Anchor {
        let taps = 2 * SMOOTHING_RADIUS + 1;
        let (sx, sy) = (-SMOOTHING_RADIUS..=SMOOTHING_RADIUS)
            .map(|k| self.get(index + k))
            .fold((0.0, 0.0), |(sx, sy), a| (sx + a.x, sy + a.y));
        Anchor::new(sx / taps as f64, sy / taps as f64)
    }

    /// Pin `anchor` at `index`. Returns false when the index is out of range.
    pub fn set(&mut self, index: i64, anchor: Anchor) -> bool {
        let Some(i) = self.slot(index) else {
            return false;
        };
        self.entries[i] = Some(anchor);
        true
    }

    /// Pin a new x at `index`, keeping the y `get` currently reports there.
    pub fn set_x(&mut self, index: i64, x: f64) -> bool {
        let y = self.get(index).y;
        self.set(index, Anchor::new(x, y))
    }

    /// Unpin `index`. Returns false when nothing was pinned there.
    pub fn clear(&mut self, index: i64) -> bool {
        match self.slot(index) {
            Some(i) if self.entries[i].is_some() => {
                self.entries[i] = None;
                true
            }
            _ => false,
        }
    }

    /// Replace every entry in `[start, stop]` with its smoothed value, recording an undo
    /// step. Returns false when the range misses the timeline entirely.
    pub fn apply_smoothing_range(&mut self, start: i64, stop: i64) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let lo = start.max(0);
        let hi = stop.min(self.entries.len() as i64 - 1);
        if lo > hi {
            return false;
        }
        let (lo, hi) = (lo as usize, hi as usize);

        let updates: Vec<Anchor> = (lo..=hi).map(|i| self.smoothed(i as i64)).collect();
        self.push_undo(UndoRecord {
            start: lo,
            prior: self.entries[lo..=hi].to_vec(),
        });
        for (slot, value) in self.entries[lo..=hi].iter_mut().zip(updates) {
            *slot = Some(value);
        }
        true
    }

    fn push_undo(&mut self, record: UndoRecord) {
        self.undo.push_back(record);
        while self.undo.len() > UNDO_DEPTH {
            self.undo.pop_front();
        }
    }

    /// Revert the most recent smoothing. Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        let Some(record) = self.undo.pop_back() else {
            return false;
        };
        let end = record.end().min(self.entries.len());
        for slot in &mut self.entries[record.start..end] {
            *slot = None;
        }
        for (offset, prior) in record.prior.into_iter().enumerate() {
            if let Some(a) = prior
                && let Some(slot) = self.entries.get_mut(record.start + offset)
            {
                *slot = Some(a);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Anchor {
        Anchor::new(x, y)
    }

    fn scenario() -> Timeline {
        let mut t = Timeline::new(10, p(100.0, 50.0));
        t.set(2, p(2.0, 2.0));
        t.set(6, p(8.0, 8.0));
        t
    }

    #[test]
    fn ten_frame_scenario() {
        let t = scenario();
        assert_eq!(t.get(0), p(2.0, 2.0));
        assert_eq!(t.get(4), p(5.5, 5.5));
        assert_eq!(t.get(9), p(8.0, 8.0));
        assert_eq!(t.get(2), p(2.0, 2.0));
        assert_eq!(t.get(6), p(8.0, 8.0));
    }

    #[test]
    fn out_of_range_returns_default() {
        let t = scenario();
        assert_eq!(t.get(-1), p(100.0, 50.0));
        assert_eq!(t.get(10), p(100.0, 50.0));
    }

    #[test]
    fn empty_timeline_returns_default_everywhere() {
        let t = Timeline::new(5, p(1.0, 2.0));
        for i in 0..5 {
            assert_eq!(t.get(i), p(1.0, 2.0));
        }
    }

    #[test]
    fn scan_horizon_is_bounded() {
        let mut t = Timeline::new(400, p(-1.0, -1.0));
        t.set(0, p(10.0, 10.0));
        t.set(300, p(20.0, 20.0));
        assert_eq!(t.get(100), p(10.0, 10.0));
        assert_eq!(t.get(101), p(-1.0, -1.0));
        assert_eq!(t.get(200), p(20.0, 20.0));
        assert_eq!(t.get(199), p(-1.0, -1.0));
    }

    #[test]
    fn set_and_clear() {
        let mut t = Timeline::new(3, p(0.0, 0.0));
        assert!(t.set(1, p(4.0, 4.0)));
        assert!(!t.set(3, p(4.0, 4.0)));
        assert!(t.clear(1));
        assert!(!t.clear(1));
        assert_eq!(t.keyframe_count(), 0);
    }

    #[test]
    fn set_x_keeps_interpolated_y() {
        let mut t = scenario();
        assert!(t.set_x(4, 42.0));
        assert_eq!(t.entry(4), Some(p(42.0, 5.5)));
    }

    #[test]
    fn smoothed_is_box_mean() {
        let mut t = Timeline::new(5, p(0.0, 0.0));
        for (i, x) in [0.0, 10.0, 20.0, 30.0, 40.0].into_iter().enumerate() {
            t.set(i as i64, p(x, 0.0));
        }
        assert_eq!(t.smoothed(2), p(20.0, 0.0));
        // Indices -2 and -1 fall back to the default anchor.
        assert_eq!(t.smoothed(0), p(6.0, 0.0));
    }

    #[test]
    fn smoothing_reads_pre_edit_values() {
        let mut t = Timeline::new(5, p(0.0, 0.0));
        for (i, x) in [0.0, 0.0, 50.0, 0.0, 0.0].into_iter().enumerate() {
            t.set(i as i64, p(x, 0.0));
        }
        let expected: Vec<Anchor> = (0..5).map(|i| t.smoothed(i)).collect();
        assert!(t.apply_smoothing_range(0, 4));
        let got: Vec<Anchor> = (0..5).map(|i| t.get(i)).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn undo_restores_exact_prior_state() {
        let mut t = scenario();
        let before = t.entries().to_vec();
        assert!(t.apply_smoothing_range(1, 7));
        assert!(t.entry(4).is_some());
        assert!(t.undo());
        assert_eq!(t.entries(), before.as_slice());
        assert!(!t.undo());
    }

    #[test]
    fn undo_stack_is_capped() {
        let mut t = scenario();
        for _ in 0..(UNDO_DEPTH + 20) {
            t.apply_smoothing_range(0, 9);
        }
        assert_eq!(t.undo_depth(), UNDO_DEPTH);
    }

    #[test]
    fn smoothing_outside_timeline_is_rejected() {
        let mut t = scenario();
        assert!(!t.apply_smoothing_range(20, 30));
        assert!(!t.apply_smoothing_range(5, 3));
        assert_eq!(t.undo_depth(), 0);
    }

    #[test]
    fn last_keyframe_finds_highest_pin() {
        assert_eq!(scenario().last_keyframe(), Some(6));
        assert_eq!(Timeline::new(4, p(0.0, 0.0)).last_keyframe(), None);
    }
}
