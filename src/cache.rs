//! Bounded frame cache with directional prefetch.
//!
//! The underlying [`FrameSource`] only decodes forward, so stepping backward one frame at
//! a time would cost a seek plus a decode per step. Instead, a backward step that misses
//! re-decodes a window of `numstep` frames ending at the target in one forward pass, and
//! the following backward steps hit the cache.

use std::collections::{HashMap, VecDeque};

use crate::{core::Frame, error::RetrackResult, source::FrameSource};

/// Interactive sessions keep one graph window of frames plus a little slack.
pub const DEFAULT_CACHE_FRAMES: usize = 135;
/// Export only ever moves forward.
pub const EXPORT_CACHE_FRAMES: usize = 10;
pub const DEFAULT_PREFETCH_STEP: u64 = 25;

/// Cache tunables, overridable through `RETRACK_CACHE_FRAMES` / `RETRACK_PREFETCH_STEP`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub numcache: usize,
    pub numstep: u64,
}

impl CacheConfig {
    pub fn new(numcache: usize, numstep: u64) -> Self {
        Self {
            numcache: numcache.max(1),
            numstep,
        }
    }

    pub fn interactive() -> Self {
        Self::new(DEFAULT_CACHE_FRAMES, DEFAULT_PREFETCH_STEP).with_env_overrides()
    }

    pub fn export() -> Self {
        Self::new(EXPORT_CACHE_FRAMES, DEFAULT_PREFETCH_STEP).with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = std::env::var("RETRACK_CACHE_FRAMES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
        {
            self.numcache = n;
        }
        if let Some(n) = std::env::var("RETRACK_PREFETCH_STEP")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0)
        {
            self.numstep = n;
        }
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_FRAMES, DEFAULT_PREFETCH_STEP)
    }
}

pub struct FrameCache<S> {
    source: S,
    total_frames: u64,
    index: i64,
    cfg: CacheConfig,
    frames: HashMap<u64, Frame>,
    mru: VecDeque<u64>, // oldest -> newest
}

impl<S: FrameSource> FrameCache<S> {
    pub fn new(source: S, total_frames: u64, cfg: CacheConfig) -> Self {
        Self {
            source,
            total_frames,
            index: -1,
            cfg,
            frames: HashMap::new(),
            mru: VecDeque::new(),
        }
    }

    /// Index of the last `read`, or -1 before the first one.
    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn config(&self) -> CacheConfig {
        self.cfg
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, index: i64) -> bool {
        u64::try_from(index).is_ok_and(|i| self.frames.contains_key(&i))
    }

    pub fn get(&self, index: i64) -> Option<&Frame> {
        u64::try_from(index).ok().and_then(|i| self.frames.get(&i))
    }

    /// The frame at the current index, if it decoded.
    pub fn current(&self) -> Option<&Frame> {
        self.get(self.index)
    }

    pub fn cached_indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.mru.iter().copied().filter(move |i| self.frames.contains_key(i))
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn in_range(&self, index: i64) -> Option<u64> {
        u64::try_from(index).ok().filter(|&i| i < self.total_frames)
    }

    /// Read frame `index` (or the one after the last read when `None`).
    ///
    /// `Ok(None)` is the stream-end signal: the index is out of range or did not decode.
    pub fn read(&mut self, index: Option<i64>) -> RetrackResult<Option<&Frame>> {
        let newindex = index.unwrap_or(self.index + 1);
        let Some(target) = self.in_range(newindex) else {
            return Ok(None);
        };

        self.prefetch(target)?;
        self.index = newindex;
        Ok(self.frames.get(&target))
    }

    fn prefetch(&mut self, target: u64) -> RetrackResult<()> {
        let moving_back = (target as i64) < self.index;
        if moving_back {
            let prev_cached = target == 0 || self.frames.contains_key(&(target - 1));
            if !prev_cached || !self.frames.contains_key(&target) {
                self.read_ahead_burst(target)?;
            }
        }

        if !self.frames.contains_key(&target) {
            if self.source.tell() != target {
                tracing::debug!(from = self.source.tell(), to = target, "seeking");
                self.source.seek(target)?;
            }
            match self.source.read()? {
                Some(frame) => {
                    self.frames.insert(target, frame);
                }
                None => {
                    tracing::warn!(index = target, "frame failed to decode");
                    self.trim();
                    return Ok(());
                }
            }
        }

        self.touch(target);
        self.trim();
        Ok(())
    }

    fn read_ahead_burst(&mut self, target: u64) -> RetrackResult<()> {
        let start = target.saturating_sub(self.cfg.numstep);
        tracing::debug!(start, end = target, "prefetching backward window");
        self.source.seek(start)?;
        for i in start..=target {
            if self.frames.contains_key(&i) {
                self.source.grab()?;
            } else if let Some(frame) = self.source.read()? {
                self.frames.insert(i, frame);
            }
        }
        self.touch_span(start, target);
        Ok(())
    }

    /// Bulk-fill the closed range `[start, stop]`, clamped to valid indices.
    ///
    /// Only the contiguous span between the first and last uncached index is decoded, with
    /// at most one seek. Indices that fail to decode are skipped.
    pub fn cache_range(&mut self, start: i64, stop: i64) -> RetrackResult<()> {
        if self.total_frames == 0 {
            return Ok(());
        }
        let start = start.max(0);
        let stop = stop.min(self.total_frames as i64 - 1);
        if start > stop {
            return Ok(());
        }

        let (start, stop) = (start as u64, stop as u64);
        let Some(first) = (start..=stop).find(|i| !self.frames.contains_key(i)) else {
            return Ok(());
        };
        let last = (first..=stop)
            .rev()
            .find(|i| !self.frames.contains_key(i))
            .unwrap_or(first);

        let pos = self.source.tell();
        if pos != first {
            tracing::debug!(from = pos, to = first, "cache_range: seeking");
            self.source.seek(first)?;
        }
        for i in first..=last {
            if !self.source.grab()? {
                continue;
            }
            if !self.frames.contains_key(&i)
                && let Some(frame) = self.source.retrieve()?
            {
                self.frames.insert(i, frame);
            }
        }

        self.touch_span(first, last);
        self.trim();
        Ok(())
    }

    fn touch(&mut self, index: u64) {
        if let Some(pos) = self.mru.iter().position(|x| *x == index) {
            self.mru.remove(pos);
        }
        self.mru.push_back(index);
    }

    fn touch_span(&mut self, start: u64, end: u64) {
        self.mru.retain(|i| *i < start || *i > end);
        self.mru.extend(start..=end);
    }

    fn trim(&mut self) {
        while self.mru.len() > self.cfg.numcache {
            self.mru.pop_front();
        }
        let mru = &self.mru;
        if self.frames.len() > mru.len() || self.frames.keys().any(|k| !mru.contains(k)) {
            self.frames.retain(|k, _| mru.contains(k));
        }
    }
}
