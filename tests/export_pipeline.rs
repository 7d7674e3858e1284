use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use retrack::{
    Anchor, CacheConfig, EncodeConfig, ExportOpts, Frame, FrameSink, Meta, MemorySource, Project,
    RetrackResult, SinkFactory, Timeline,
};

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "retrack_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

#[derive(Default)]
struct Recorded {
    configs: Vec<EncodeConfig>,
    frames: Vec<Frame>,
    finished: usize,
}

struct RecordingSink {
    log: Rc<RefCell<Recorded>>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl FrameSink for RecordingSink {
    fn write_frame(&mut self, frame: &Frame) -> RetrackResult<()> {
        let mut log = self.log.borrow_mut();
        log.frames.push(frame.clone());
        if let Some((n, flag)) = &self.cancel_after
            && log.frames.len() >= *n
        {
            flag.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> RetrackResult<()> {
        self.log.borrow_mut().finished += 1;
        Ok(())
    }
}

struct Recorder {
    log: Rc<RefCell<Recorded>>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl SinkFactory for Recorder {
    fn open(&mut self, cfg: &EncodeConfig) -> RetrackResult<Box<dyn FrameSink>> {
        self.log.borrow_mut().configs.push(cfg.clone());
        Ok(Box::new(RecordingSink {
            log: self.log.clone(),
            cancel_after: self.cancel_after.clone(),
        }))
    }
}

/// Frames whose pixel (x, y) holds (x, y, frame index).
fn assert_near(got: [u8; 4], want: [u8; 4]) {
    for (g, w) in got.iter().zip(want) {
        assert!(g.abs_diff(w) <= 1, "got {got:?}, want {want:?}");
    }
}

fn gradient_source(frames: u64, w: u32, h: u32) -> MemorySource {
    MemorySource::new(
        (0..frames)
            .map(|i| {
                let mut data = Vec::with_capacity((w * h * 4) as usize);
                for y in 0..h {
                    for x in 0..w {
                        data.extend_from_slice(&[x as u8, y as u8, i as u8, 255]);
                    }
                }
                Frame::new(w, h, data).unwrap()
            })
            .collect(),
    )
}

fn write_meta(dir: &Path, sigma: f64) -> PathBuf {
    let meta_path = dir.join("shot.json");
    let json = format!(
        r#"{{
  "source": "shot.mp4",
  "keyframes": "shot.keys.json",
  "screen": [4, 4],
  "position": [2, 2],
  "anchor": [20, 20],
  "scale": 1,
  "viewbox": [0, 0, 4, 4],
  "anchor_x_range": [10, 40],
  "anchor_y_range": [5, 30],
  "sigma": {sigma}
}}"#
    );
    std::fs::write(&meta_path, json).unwrap();
    meta_path
}

fn project(dir: &Path, sigma: f64, entries: Vec<Option<Anchor>>) -> Project<MemorySource> {
    let meta_path = write_meta(dir, sigma);
    let meta = Meta::load(&meta_path).unwrap();
    let frames = entries.len() as u64;
    let timeline = Timeline::from_entries(entries, meta.default_anchor());
    Project::new(meta_path, meta, timeline, gradient_source(frames, 64, 48), 25.0).unwrap()
}

#[test]
fn export_follows_clamped_anchor_path() {
    let dir = temp_dir("export_clamp");
    std::fs::create_dir_all(&dir).unwrap();

    let mut entries = vec![None; 6];
    entries[0] = Some(Anchor::new(0.0, 0.0));
    entries[2] = Some(Anchor::new(25.0, 12.0));
    entries[5] = Some(Anchor::new(60.0, 40.0));
    let p = project(&dir, 0.0, entries);

    let log = Rc::new(RefCell::new(Recorded::default()));
    let stats = p
        .export(
            "out.mp4",
            &mut Recorder {
                log: log.clone(),
                cancel_after: None,
            },
            &ExportOpts::default(),
        )
        .unwrap();
    assert_eq!(stats.frames_written, 6);
    assert!(!stats.cancelled);

    let log = log.borrow();
    assert_eq!(log.configs.len(), 1);
    assert_eq!((log.configs[0].width, log.configs[0].height), (4, 4));
    assert_eq!(log.configs[0].fps, 25.0);
    assert_eq!(log.finished, 1);

    // Output pixel (2, 2) shows the source at the anchor.
    let centre = |i: usize| log.frames[i].pixel(2, 2);
    assert_near(centre(0), [10, 5, 0, 255]);
    assert_near(centre(2), [25, 12, 2, 255]);
    assert_near(centre(5), [40, 30, 5, 255]);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn export_can_be_cancelled_mid_stream() {
    let dir = temp_dir("export_cancel");
    std::fs::create_dir_all(&dir).unwrap();
    let p = project(&dir, 0.0, vec![None; 20]);

    let flag = Arc::new(AtomicBool::new(false));
    let log = Rc::new(RefCell::new(Recorded::default()));
    let stats = p
        .export(
            "out.mp4",
            &mut Recorder {
                log: log.clone(),
                cancel_after: Some((7, flag.clone())),
            },
            &ExportOpts { cancel: Some(flag) },
        )
        .unwrap();
    assert!(stats.cancelled);
    assert_eq!(stats.frames_written, 7);
    assert_eq!(log.borrow().finished, 1);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn sigma_smooths_exported_x() {
    let dir = temp_dir("export_sigma");
    std::fs::create_dir_all(&dir).unwrap();

    let mut entries = vec![None; 11];
    for (i, e) in entries.iter_mut().enumerate() {
        let x = if i == 5 { 38.0 } else { 14.0 };
        *e = Some(Anchor::new(x, 20.0));
    }
    let p = project(&dir, 0.04, entries);

    let log = Rc::new(RefCell::new(Recorded::default()));
    p.export(
        "out.mp4",
        &mut Recorder {
            log: log.clone(),
            cancel_after: None,
        },
        &ExportOpts::default(),
    )
    .unwrap();

    let log = log.borrow();
    let spike = log.frames[5].pixel(2, 2);
    let neighbour = log.frames[4].pixel(2, 2);
    assert!(spike[0] < 38 && spike[0] > 14, "spike x {}", spike[0]);
    assert!(neighbour[0] > 14, "neighbour x {}", neighbour[0]);
    assert!(spike[1].abs_diff(20) <= 1, "spike y {}", spike[1]);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn session_edits_save_alongside_meta() {
    let dir = temp_dir("session_save");
    std::fs::create_dir_all(&dir).unwrap();
    let p = project(&dir, 0.0, vec![None; 8]);

    let mut session = p.into_session(CacheConfig::new(8, 4)).unwrap();
    session.step(3).unwrap();
    session.set_anchor(Anchor::new(12.0, 13.0));
    let report = session.save(&mut |_: &Path| true).unwrap();
    assert!(report.keyframes.was_written());

    let keys = std::fs::read_to_string(dir.join("shot.keys.json")).unwrap();
    let parsed: Vec<Option<[f64; 2]>> = serde_json::from_str(&keys).unwrap();
    assert_eq!(parsed.len(), 8);
    assert_eq!(parsed[3], Some([12.0, 13.0]));
    assert!(dir.join("shot.json.bak").exists());

    std::fs::remove_dir_all(&dir).unwrap();
}
