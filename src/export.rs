//! Sequential render of the whole timeline to encoded video.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    cache::{CacheConfig, FrameCache},
    composite::{Compositor, Resample},
    core::{Anchor, Range1},
    encode_ffmpeg::{FrameSink, SinkFactory, default_mp4_config, has_segment_pattern, segment_path},
    error::{RetrackError, RetrackResult},
    meta::Meta,
    smooth::gaussian_filter1d,
    source::FrameSource,
    timeline::Timeline,
};

/// Seconds of output per segment when the destination is a `%d` pattern.
pub const SEGMENT_SECONDS: f64 = 600.0;
const PROGRESS_EVERY: u64 = 10;

#[derive(Clone, Debug, Default)]
pub struct ExportOpts {
    /// Checked between frames; when set the current segment is finished and export stops.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ExportOpts {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub frames_written: u64,
    pub segments: u32,
    pub cancelled: bool,
}

pub struct Exporter<'a> {
    timeline: &'a Timeline,
    compositor: &'a Compositor,
    x_range: Range1,
    y_range: Range1,
    /// Seconds.
    sigma: f64,
    fps: f64,
}

impl<'a> Exporter<'a> {
    pub fn new(
        timeline: &'a Timeline,
        compositor: &'a Compositor,
        x_range: Range1,
        y_range: Range1,
        sigma: f64,
        fps: f64,
    ) -> RetrackResult<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(RetrackError::validation("export fps must be positive"));
        }
        Ok(Self {
            timeline,
            compositor,
            x_range,
            y_range,
            sigma,
            fps,
        })
    }

    pub fn from_meta(
        meta: &Meta,
        timeline: &'a Timeline,
        compositor: &'a Compositor,
        fps: f64,
    ) -> RetrackResult<Self> {
        Self::new(
            timeline,
            compositor,
            meta.anchor_x_range,
            meta.anchor_y_range,
            meta.sigma(),
            fps,
        )
    }

    /// Per-frame anchors after clamping and the optional Gaussian pass over x.
    pub fn anchor_path(&self) -> RetrackResult<Vec<Anchor>> {
        let mut path: Vec<Anchor> = (0..self.timeline.len() as i64)
            .map(|i| {
                let a = self.timeline.get(i);
                Anchor::new(self.x_range.clamp(a.x), self.y_range.clamp(a.y))
            })
            .collect();

        if self.sigma > 0.0 && !path.is_empty() {
            let xs: Vec<f64> = path.iter().map(|a| a.x).collect();
            let smoothed = gaussian_filter1d(&xs, self.sigma * self.fps)?;
            for (a, x) in path.iter_mut().zip(smoothed) {
                a.x = x;
            }
        }
        Ok(path)
    }

    /// Frames per segment; `None` when `dest` is a single file.
    pub fn segment_len(&self, dest: &str) -> Option<u64> {
        has_segment_pattern(dest).then(|| ((SEGMENT_SECONDS * self.fps).floor() as u64).max(1))
    }

    #[tracing::instrument(skip_all, fields(dest = %dest, frames = self.timeline.len()))]
    pub fn run<S: FrameSource>(
        &self,
        source: S,
        dest: &str,
        sinks: &mut dyn SinkFactory,
        opts: &ExportOpts,
    ) -> RetrackResult<ExportStats> {
        let path = self.anchor_path()?;
        let mut current: Option<Box<dyn FrameSink>> = None;
        let written = self.write_frames(source, &path, dest, sinks, opts, &mut current);

        // The open segment is finished on failure too.
        let finished = match current.take() {
            Some(open) => open.finish(),
            None => Ok(()),
        };
        let stats = match written {
            Ok(stats) => stats,
            Err(e) => {
                if let Err(fe) = finished {
                    tracing::warn!(error = %fe, "closing output after failed export");
                }
                return Err(e);
            }
        };
        finished?;

        tracing::info!(
            frames = stats.frames_written,
            segments = stats.segments,
            "export done"
        );
        Ok(stats)
    }

    /// Render and encode every frame. The segment being written is left in `current` for
    /// the caller to finish.
    fn write_frames<S: FrameSource>(
        &self,
        source: S,
        path: &[Anchor],
        dest: &str,
        sinks: &mut dyn SinkFactory,
        opts: &ExportOpts,
        current: &mut Option<Box<dyn FrameSink>>,
    ) -> RetrackResult<ExportStats> {
        let total = path.len() as u64;
        let mut cache = FrameCache::new(source, total, CacheConfig::export());
        let segment_len = self.segment_len(dest);
        let mut stats = ExportStats::default();

        for (i, anchor) in (0u64..).zip(path.iter().copied()) {
            if opts.cancelled() {
                tracing::info!(frame = i, "export cancelled");
                stats.cancelled = true;
                break;
            }

            if let Some(len) = segment_len
                && i > 0
                && i % len == 0
                && let Some(done) = current.take()
            {
                done.finish()?;
            }

            let frame = cache
                .read(Some(i as i64))?
                .ok_or_else(|| RetrackError::decode(format!("frame {i} failed to decode")))?;
            let out = self.compositor.render(frame, anchor, Resample::Linear)?;

            let sink = match current.take() {
                Some(s) => s,
                None => {
                    stats.segments += 1;
                    let out_path = match segment_len {
                        Some(_) => segment_path(dest, stats.segments),
                        None => dest.to_string(),
                    };
                    tracing::info!(path = %out_path, segment = stats.segments, "opening output");
                    sinks.open(&default_mp4_config(
                        out_path,
                        self.compositor.width(),
                        self.compositor.height(),
                        self.fps,
                    ))?
                }
            };
            current.insert(sink).write_frame(&out)?;
            stats.frames_written += 1;

            if i % PROGRESS_EVERY == 0 {
                tracing::info!(
                    frame = i,
                    total,
                    percent = 100.0 * i as f64 / total as f64,
                    "export progress"
                );
            }
        }
        Ok(stats)
    }
}
