#![forbid(unsafe_code)]
//! Manual video retracking: pin an anchor point per frame, interpolate and smooth the
//! path, and render a cropped, scaled output that follows it.

pub mod cache;
pub mod composite;
pub mod core;
pub mod encode_ffmpeg;
pub mod error;
pub mod export;
pub mod meta;
pub mod project;
pub mod session;
pub mod smooth;
pub mod source;
pub mod timeline;
pub mod track;

pub use cache::{CacheConfig, FrameCache};
pub use composite::{Compositor, Resample};
pub use crate::core::{Affine, Anchor, Frame, Point, Range1, Rect, Vec2};
pub use encode_ffmpeg::{
    EncodeConfig, FfmpegEncoder, FfmpegSinkFactory, FrameSink, SinkFactory, is_ffmpeg_on_path,
    segment_path,
};
pub use error::{RetrackError, RetrackResult};
pub use export::{ExportOpts, ExportStats, Exporter};
pub use meta::{Meta, SaveOutcome, SaveReport};
pub use project::{MediaSource, Project};
pub use session::{Playback, Session, StepOutcome};
pub use source::{
    FrameSource,
    ffmpeg::{FfmpegSource, VideoSourceInfo, is_ffprobe_on_path},
    memory::MemorySource,
    rate::{RateAdapter, decimation_for},
};
pub use timeline::Timeline;
pub use track::{FaceDetector, GrayFrame, TrackStep, Tracker};
