use crate::{core::Frame, error::RetrackResult, source::FrameSource};

/// Highest effective frame rate the session works at.
pub const MAX_EFFECTIVE_FPS: f64 = 30.0;

/// Smallest integer `d >= 1` such that `fps / d <= MAX_EFFECTIVE_FPS`.
pub fn decimation_for(fps: f64) -> u32 {
    if !fps.is_finite() || fps <= MAX_EFFECTIVE_FPS {
        return 1;
    }
    let mut d = 1u32;
    while fps / f64::from(d) > MAX_EFFECTIVE_FPS {
        d += 1;
    }
    d
}

/// Exposes every `decimate`-th frame of the wrapped source.
///
/// Logical frame `i` is underlying frame `(i + 1) * decimate - 1`.
#[derive(Debug)]
pub struct RateAdapter<S> {
    inner: S,
    decimate: u32,
}

impl<S: FrameSource> RateAdapter<S> {
    pub fn new(inner: S, decimate: u32) -> Self {
        Self {
            inner,
            decimate: decimate.max(1),
        }
    }

    pub fn decimate(&self) -> u32 {
        self.decimate
    }

    pub fn effective_fps(&self, source_fps: f64) -> f64 {
        source_fps / f64::from(self.decimate)
    }

    /// Logical frame count. Decimated sources drop the final group so the last logical
    /// frame never lands on a partially decoded tail.
    pub fn effective_frames(&self, source_frames: u64) -> u64 {
        let whole = source_frames / u64::from(self.decimate);
        whole.saturating_sub(u64::from(self.decimate > 1))
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: FrameSource> FrameSource for RateAdapter<S> {
    fn grab(&mut self) -> RetrackResult<bool> {
        for _ in 0..self.decimate {
            if !self.inner.grab()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn retrieve(&mut self) -> RetrackResult<Option<Frame>> {
        self.inner.retrieve()
    }

    fn seek(&mut self, pos: u64) -> RetrackResult<()> {
        self.inner.seek(pos.saturating_mul(u64::from(self.decimate)))
    }

    fn tell(&self) -> u64 {
        self.inner.tell() / u64::from(self.decimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;

    fn marker(f: &Frame) -> u64 {
        let px = f.pixel(0, 0);
        u64::from(px[0]) + 256 * u64::from(px[1])
    }

    #[test]
    fn decimation_keeps_rate_at_or_below_30() {
        assert_eq!(decimation_for(24.0), 1);
        assert_eq!(decimation_for(30.0), 1);
        assert_eq!(decimation_for(50.0), 2);
        assert_eq!(decimation_for(60.0), 2);
        assert_eq!(decimation_for(59.94), 2);
        assert_eq!(decimation_for(120.0), 4);
        assert_eq!(decimation_for(f64::NAN), 1);
    }

    #[test]
    fn sequential_reads_yield_last_of_each_group() {
        let mut src = RateAdapter::new(MemorySource::synthetic(9, 1, 1), 3);
        let got: Vec<u64> = (0..3)
            .map(|_| marker(&src.read().unwrap().unwrap()))
            .collect();
        assert_eq!(got, vec![2, 5, 8]);
        assert!(src.read().unwrap().is_none());
    }

    #[test]
    fn tell_after_seek_is_the_logical_index() {
        let mut src = RateAdapter::new(MemorySource::synthetic(40, 1, 1), 3);
        for i in [0u64, 1, 5, 12] {
            src.seek(i).unwrap();
            assert_eq!(src.tell(), i);
        }
    }

    #[test]
    fn seek_then_read_matches_sequential_mapping() {
        let mut src = RateAdapter::new(MemorySource::synthetic(40, 1, 1), 2);
        src.seek(4).unwrap();
        assert_eq!(marker(&src.read().unwrap().unwrap()), 9);
        assert_eq!(src.tell(), 5);
    }

    #[test]
    fn partial_group_at_end_is_stream_end() {
        let mut src = RateAdapter::new(MemorySource::synthetic(5, 1, 1), 2);
        src.seek(1).unwrap();
        assert!(src.grab().unwrap());
        assert!(!src.grab().unwrap());
    }

    #[test]
    fn decimated_frame_count_drops_last_group() {
        assert_eq!(RateAdapter::new(MemorySource::default(), 1).effective_frames(61), 61);
        assert_eq!(RateAdapter::new(MemorySource::default(), 2).effective_frames(61), 29);
        assert_eq!(RateAdapter::new(MemorySource::default(), 2).effective_frames(60), 29);
        assert_eq!(RateAdapter::new(MemorySource::default(), 4).effective_frames(3), 0);
    }
}
