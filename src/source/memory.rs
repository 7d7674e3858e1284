use std::collections::BTreeSet;

use crate::{core::Frame, error::RetrackResult, source::FrameSource};

/// Forward-only source over frames already held in memory.
///
/// Counts seeks, grabs and retrieves so callers can observe access patterns.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    frames: Vec<Frame>,
    pos: u64,
    last: Option<u64>,
    corrupt: BTreeSet<u64>,
    seeks: u64,
    grabs: u64,
    retrieves: u64,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    /// `count` solid frames whose red/green channels encode the frame index.
    pub fn synthetic(count: u64, width: u32, height: u32) -> Self {
        Self::new((0..count).map(|i| Self::marker(i, width, height)).collect())
    }

    pub fn marker(index: u64, width: u32, height: u32) -> Frame {
        Frame::filled(
            width,
            height,
            [(index % 256) as u8, ((index / 256) % 256) as u8, 0, 255],
        )
    }

    /// Frames at these positions grab fine but fail to materialize.
    pub fn with_corrupt(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.corrupt.extend(indices);
        self
    }

    pub fn len(&self) -> u64 {
        self.frames.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn seeks(&self) -> u64 {
        self.seeks
    }

    pub fn grabs(&self) -> u64 {
        self.grabs
    }

    pub fn retrieves(&self) -> u64 {
        self.retrieves
    }
}

impl FrameSource for MemorySource {
    fn grab(&mut self) -> RetrackResult<bool> {
        if self.pos >= self.len() {
            self.last = None;
            return Ok(false);
        }
        self.grabs += 1;
        self.last = Some(self.pos);
        self.pos += 1;
        Ok(true)
    }

    fn retrieve(&mut self) -> RetrackResult<Option<Frame>> {
        let Some(idx) = self.last else {
            return Ok(None);
        };
        self.retrieves += 1;
        if self.corrupt.contains(&idx) {
            return Ok(None);
        }
        Ok(self.frames.get(idx as usize).cloned())
    }

    fn seek(&mut self, pos: u64) -> RetrackResult<()> {
        self.seeks += 1;
        self.pos = pos.min(self.len());
        self.last = None;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }
}
