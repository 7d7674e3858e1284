//! Strictly-forward, seek-capable frame sources.
//!
//! Decoders in this crate only move forward. Random access is built on top of
//! [`FrameSource::seek`] plus sequential [`FrameSource::grab`] calls by
//! [`FrameCache`](crate::FrameCache).

pub mod ffmpeg;
pub mod memory;
pub mod rate;

use crate::{core::Frame, error::RetrackResult};

/// A decoder that yields frames in order and can be repositioned.
///
/// End of stream is not an error: `grab` returns `Ok(false)` and `retrieve` returns
/// `Ok(None)`. `Err` means the decoder itself is unusable (process spawn, broken IO).
pub trait FrameSource {
    /// Advance past the next frame without materializing it.
    fn grab(&mut self) -> RetrackResult<bool>;

    /// Materialize the most recently grabbed frame.
    fn retrieve(&mut self) -> RetrackResult<Option<Frame>>;

    /// Position the source so the next `grab` yields frame `pos`.
    fn seek(&mut self, pos: u64) -> RetrackResult<()>;

    /// Index of the next frame `grab` would yield.
    fn tell(&self) -> u64;

    fn read(&mut self) -> RetrackResult<Option<Frame>> {
        if !self.grab()? {
            return Ok(None);
        }
        self.retrieve()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn grab(&mut self) -> RetrackResult<bool> {
        (**self).grab()
    }

    fn retrieve(&mut self) -> RetrackResult<Option<Frame>> {
        (**self).retrieve()
    }

    fn seek(&mut self, pos: u64) -> RetrackResult<()> {
        (**self).seek(pos)
    }

    fn tell(&self) -> u64 {
        (**self).tell()
    }

    fn read(&mut self) -> RetrackResult<Option<Frame>> {
        (**self).read()
    }
}
