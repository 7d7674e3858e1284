//! A meta descriptor opened together with its source and keyframes.

use std::path::{Path, PathBuf};

use crate::{
    cache::CacheConfig,
    encode_ffmpeg::SinkFactory,
    error::{RetrackError, RetrackResult},
    export::{ExportOpts, ExportStats, Exporter},
    meta::{Meta, SaveReport, load_keyframes, save_all},
    session::Session,
    source::{
        FrameSource,
        ffmpeg::FfmpegSource,
        rate::{RateAdapter, decimation_for},
    },
    timeline::Timeline,
};

/// The production source stack: ffmpeg decode reduced to at most 30 fps.
pub type MediaSource = RateAdapter<FfmpegSource>;

pub struct Project<S> {
    meta_path: PathBuf,
    meta: Meta,
    timeline: Timeline,
    source: S,
    fps: f64,
}

impl Project<MediaSource> {
    /// Load `meta_path`, inspect and open its source, and read the keyframe store.
    pub fn open(meta_path: &Path) -> RetrackResult<Self> {
        let mut meta = Meta::load(meta_path)?;
        let source = FfmpegSource::open(&meta.source_path())?;
        let info = source.info().clone();

        let adapter = RateAdapter::new(source, decimation_for(info.source_fps()));
        let fps = adapter.effective_fps(info.source_fps());
        let total = adapter.effective_frames(info.frame_count);
        tracing::info!(
            source = %info.source_path.display(),
            source_fps = info.source_fps(),
            decimate = adapter.decimate(),
            fps,
            frames = total,
            "opened source"
        );

        meta.set_source_info(fps, total, info.width, info.height);
        let entries = load_keyframes(&meta.keyframes_path(), total as usize)?;
        let timeline = Timeline::from_entries(entries, meta.default_anchor());
        Self::new(meta_path, meta, timeline, adapter, fps)
    }
}

impl<S: FrameSource> Project<S> {
    pub fn new(
        meta_path: impl Into<PathBuf>,
        meta: Meta,
        timeline: Timeline,
        source: S,
        fps: f64,
    ) -> RetrackResult<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(RetrackError::validation("source fps must be positive"));
        }
        Ok(Self {
            meta_path: meta_path.into(),
            meta,
            timeline,
            source,
            fps,
        })
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn total_frames(&self) -> u64 {
        self.timeline.len() as u64
    }

    pub fn save(&self, confirm: &mut dyn FnMut(&Path) -> bool) -> RetrackResult<SaveReport> {
        save_all(&self.meta_path, &self.meta, self.timeline.entries(), confirm)
    }

    /// Render the whole timeline to `dest`, consuming the source.
    pub fn export(
        self,
        dest: &str,
        sinks: &mut dyn SinkFactory,
        opts: &ExportOpts,
    ) -> RetrackResult<ExportStats> {
        let compositor = self.meta.compositor()?;
        Exporter::from_meta(&self.meta, &self.timeline, &compositor, self.fps)?.run(
            self.source,
            dest,
            sinks,
            opts,
        )
    }

    pub fn into_session(self, cfg: CacheConfig) -> RetrackResult<Session<S>> {
        Session::open(
            self.meta_path,
            self.meta,
            self.timeline,
            self.source,
            self.fps,
            cfg,
        )
    }
}
