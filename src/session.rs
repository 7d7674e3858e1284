//! Interactive retracking state: where we are, what the anchor is, and how stepping,
//! tracking and playback move it.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use crate::{
    cache::{CacheConfig, FrameCache},
    composite::{Compositor, Resample},
    core::{Anchor, Frame, Rect},
    error::RetrackResult,
    meta::{Meta, SaveReport, save_all},
    source::FrameSource,
    timeline::Timeline,
    track::{
        ADAPT_RATE, ATTRACT_RATE, FaceDetector, GrayFrame, TRACKER_SCALE, Tracker, chin_point,
        tracker_downscale, tracker_upscale,
    },
};

/// Below this magnitude playback counts as stopped.
const MIN_SPEED: f64 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Moved,
    /// Stream end, failed decode, or the tracker lost its target.
    Stop,
}

/// Wall-clock schedule for playback. Late frames are not caught up.
#[derive(Clone, Copy, Debug, Default)]
pub struct Playback {
    speed: f64,
    scheduled: Option<Instant>,
}

impl Playback {
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_playing(&self) -> bool {
        self.speed.abs() > MIN_SPEED
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
        self.scheduled = None;
    }

    pub fn stop(&mut self) {
        self.speed = 0.0;
    }

    /// Adjust speed by `delta` (the UI uses ±0.5) and restart the schedule.
    pub fn nudge(&mut self, delta: f64) {
        self.set_speed(self.speed + delta);
    }

    /// Stop when playing, otherwise start at `speed`.
    pub fn toggle(&mut self, speed: f64) {
        if self.is_playing() {
            self.stop();
        } else {
            self.set_speed(speed);
        }
    }

    /// Time left until the next frame is due. When already late the schedule restarts
    /// from `now`.
    pub fn wait(&mut self, now: Instant) -> Option<Duration> {
        match self.scheduled {
            Some(at) if at > now => Some(at - now),
            _ => {
                self.scheduled = Some(now);
                None
            }
        }
    }

    /// Schedule the next frame `1 / (fps * |speed|)` after the current one.
    pub fn advance(&mut self, fps: f64) {
        let dt = 1.0 / (fps * self.speed.abs());
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }
        if let Some(at) = self.scheduled.as_mut() {
            *at += Duration::from_secs_f64(dt);
        }
    }
}

pub struct Session<S> {
    meta_path: PathBuf,
    meta: Meta,
    timeline: Timeline,
    cache: FrameCache<S>,
    compositor: Compositor,
    fps: f64,
    anchor: Anchor,
    playback: Playback,
    tracker: Option<Box<dyn Tracker>>,
    face_detector: Option<Box<dyn FaceDetector>>,
    gray: Option<GrayFrame>,
    faces: Vec<Rect>,
}

impl<S: FrameSource> Session<S> {
    /// Start at the last pinned frame, or frame 0 when nothing is pinned.
    pub fn open(
        meta_path: impl Into<PathBuf>,
        meta: Meta,
        timeline: Timeline,
        source: S,
        fps: f64,
        cfg: CacheConfig,
    ) -> RetrackResult<Self> {
        let compositor = meta.compositor()?;
        let cache = FrameCache::new(source, timeline.len() as u64, cfg);
        let anchor = timeline.default_anchor();
        let mut session = Self {
            meta_path: meta_path.into(),
            meta,
            timeline,
            cache,
            compositor,
            fps,
            anchor,
            playback: Playback::default(),
            tracker: None,
            face_detector: None,
            gray: None,
            faces: Vec::new(),
        };

        let start = session.timeline.last_keyframe().unwrap_or(0) as i64;
        if !session.load_frame(start, true)? {
            tracing::warn!(index = start, "initial frame did not decode");
        }
        tracing::info!(index = start, frames = session.total_frames(), "session opened");
        Ok(session)
    }

    pub fn index(&self) -> i64 {
        self.cache.index()
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn cache(&self) -> &FrameCache<S> {
        &self.cache
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn total_frames(&self) -> u64 {
        self.cache.total_frames()
    }

    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut Playback {
        &mut self.playback
    }

    /// Faces found on the last tracked step, source coordinates.
    pub fn faces(&self) -> &[Rect] {
        &self.faces
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.cache.current()
    }

    /// Start tracking from the current anchor.
    pub fn attach_tracker(&mut self, mut tracker: Box<dyn Tracker>) -> RetrackResult<()> {
        tracker.set_position(tracker_downscale(self.anchor));
        self.tracker = Some(tracker);
        self.refresh_gray()
    }

    pub fn detach_tracker(&mut self) -> Option<Box<dyn Tracker>> {
        self.tracker.take()
    }

    pub fn attach_face_detector(&mut self, detector: Box<dyn FaceDetector>) -> RetrackResult<()> {
        self.face_detector = Some(detector);
        self.refresh_gray()
    }

    pub fn detach_face_detector(&mut self) -> Option<Box<dyn FaceDetector>> {
        self.faces.clear();
        self.face_detector.take()
    }

    fn wants_gray(&self) -> bool {
        self.tracker.is_some() || self.face_detector.is_some()
    }

    fn refresh_gray(&mut self) -> RetrackResult<()> {
        self.gray = match (self.wants_gray(), self.cache.current()) {
            (true, Some(frame)) => Some(GrayFrame::from_frame(frame)?),
            _ => None,
        };
        Ok(())
    }

    /// Decode `index` and take its anchor from the timeline. Returns false when the index
    /// is out of range or the frame did not decode.
    pub fn load_frame(&mut self, index: i64, update_tracker: bool) -> RetrackResult<bool> {
        if index < 0 || index as u64 >= self.cache.total_frames() {
            return Ok(false);
        }
        let wants_gray = self.wants_gray();
        let Some(frame) = self.cache.read(Some(index))? else {
            self.gray = None;
            return Ok(false);
        };
        self.gray = if wants_gray {
            Some(GrayFrame::from_frame(frame)?)
        } else {
            None
        };

        self.anchor = self.timeline.get(index);
        if update_tracker && let Some(tracker) = self.tracker.as_mut() {
            tracker.set_position(tracker_downscale(self.anchor));
        }
        Ok(true)
    }

    /// Move by `delta` frames. Single steps run the tracker; larger jumps only load.
    pub fn step(&mut self, delta: i64) -> RetrackResult<StepOutcome> {
        let index = self.index();
        let target = index + delta;

        if delta.abs() == 1 {
            if !self.load_frame(target, false)? {
                return Ok(StepOutcome::Stop);
            }
            return self.track_update();
        }

        if delta > 1 {
            self.cache.cache_range(index, index + delta + 1)?;
        }
        let update_tracker = self.tracker.is_some();
        if !self.load_frame(target, update_tracker)? {
            return Ok(StepOutcome::Stop);
        }
        Ok(StepOutcome::Moved)
    }

    fn track_update(&mut self) -> RetrackResult<StepOutcome> {
        let Some(gray) = self.gray.as_ref() else {
            return Ok(StepOutcome::Moved);
        };
        let start = self.anchor;
        let mut next = start;

        if let Some(tracker) = self.tracker.as_mut() {
            let step = tracker.track(gray)?;
            if !step.good {
                tracing::warn!(index = self.cache.index(), "tracking lost, stopping");
                return Ok(StepOutcome::Stop);
            }
            next += step.delta * TRACKER_SCALE;
        }

        if let Some(detector) = self.face_detector.as_mut() {
            let roi = self.tracker.as_ref().map(|t| {
                let size = t.size();
                let r = Rect::new(
                    next.x - size.x,
                    next.y - 2.0 * size.y,
                    next.x + size.x,
                    next.y + size.y,
                );
                r.scale_from_origin(1.0 / TRACKER_SCALE)
                    .intersect(gray.bounds())
            });
            self.faces = detector
                .detect(gray, roi)?
                .into_iter()
                .map(|f| f.scale_from_origin(TRACKER_SCALE))
                .collect();

            if self.tracker.is_some()
                && let Some(face) = nearest_face(&self.faces, start)
            {
                let chin = chin_point(face);
                next += (chin - next) * ATTRACT_RATE;
            }
        }

        if let Some(tracker) = self.tracker.as_mut() {
            tracker.adapt(gray, ADAPT_RATE, (next - start) / TRACKER_SCALE)?;
            let pos = tracker_upscale(tracker.position());
            self.set_anchor(pos);
        }
        Ok(StepOutcome::Moved)
    }

    /// Pin `anchor` at the current frame.
    pub fn set_anchor(&mut self, anchor: Anchor) {
        self.anchor = anchor;
        self.timeline.set(self.index(), anchor);
    }

    /// Unpin the current frame. Returns false when it was not pinned.
    pub fn clear_current(&mut self) -> bool {
        let index = self.index();
        if !self.timeline.clear(index) {
            return false;
        }
        self.anchor = self.timeline.get(index);
        true
    }

    pub fn smooth(&mut self, start: i64, stop: i64) -> bool {
        let applied = self.timeline.apply_smoothing_range(start, stop);
        if applied {
            self.anchor = self.timeline.get(self.index());
        }
        applied
    }

    pub fn undo(&mut self) -> bool {
        let undone = self.timeline.undo();
        if undone {
            self.anchor = self.timeline.get(self.index());
        }
        undone
    }

    /// The output view of the current frame, or `None` when it did not decode.
    pub fn render_preview(&self) -> RetrackResult<Option<Frame>> {
        self.cache
            .current()
            .map(|f| self.compositor.render(f, self.anchor, Resample::Area))
            .transpose()
    }

    /// The viewbox overlay for the current anchor, source coordinates.
    pub fn source_viewbox(&self) -> Rect {
        self.compositor.viewbox_in_source(self.anchor)
    }

    pub fn save(&self, confirm: &mut dyn FnMut(&Path) -> bool) -> RetrackResult<SaveReport> {
        save_all(&self.meta_path, &self.meta, self.timeline.entries(), confirm)
    }

    /// One playback iteration: wait for the schedule, then step in the speed's direction.
    /// Returns whether playback is still running.
    pub fn play_tick(&mut self) -> RetrackResult<bool> {
        if !self.playback.is_playing() {
            return Ok(false);
        }
        if let Some(dt) = self.playback.wait(Instant::now()) {
            std::thread::sleep(dt);
        }

        let backward = self.playback.speed() < 0.0;
        let outcome = self.step(if backward { -1 } else { 1 })?;

        if backward && self.index() == 0 {
            self.playback.stop();
        } else {
            self.playback.advance(self.fps);
        }
        if outcome == StepOutcome::Stop {
            self.playback.stop();
        }
        Ok(self.playback.is_playing())
    }

    /// Play at `speed` until playback stops by itself, `limit` ticks have run, or
    /// `interrupt` is raised. `interrupt` is checked before every tick. Returns the number
    /// of ticks run; playback is stopped afterwards.
    pub fn play(
        &mut self,
        speed: f64,
        limit: Option<u64>,
        interrupt: &AtomicBool,
    ) -> RetrackResult<u64> {
        self.playback.set_speed(speed);
        let mut ticks = 0u64;
        let result = loop {
            if !self.playback.is_playing() || limit.is_some_and(|n| ticks >= n) {
                break Ok(ticks);
            }
            if interrupt.load(Ordering::Relaxed) {
                tracing::info!(index = self.index(), "playback interrupted");
                break Ok(ticks);
            }
            match self.play_tick() {
                Ok(_) => ticks += 1,
                Err(e) => break Err(e),
            }
        };
        self.playback.stop();
        result
    }
}

/// The face whose top-left corner is closest to `anchor`.
fn nearest_face(faces: &[Rect], anchor: Anchor) -> Option<Rect> {
    faces.iter().copied().min_by(|a, b| {
        let da = (a.origin() - anchor).hypot2();
        let db = (b.origin() - anchor).hypot2();
        da.total_cmp(&db)
    })
}
