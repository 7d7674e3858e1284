#[cfg(feature = "media-ffmpeg")]
mod media_pipeline {
    use std::{
        path::{Path, PathBuf},
        process::Command,
    };

    use retrack::{
        CacheConfig, ExportOpts, FfmpegSinkFactory, FrameCache, FrameSource, Project,
        is_ffmpeg_on_path, is_ffprobe_on_path,
    };

    fn ffmpeg_tools_available() -> bool {
        is_ffmpeg_on_path() && is_ffprobe_on_path()
    }

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "retrack_{name}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    fn synth_project(root: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(root)?;

        let status = Command::new("ffmpeg")
            .args([
                "-v",
                "error",
                "-y",
                "-f",
                "lavfi",
                "-i",
                "testsrc=size=64x48:rate=60",
                "-t",
                "1",
                "-pix_fmt",
                "yuv420p",
                "-c:v",
                "libx264",
            ])
            .arg(root.join("clip.mp4"))
            .status()?;
        anyhow::ensure!(status.success(), "ffmpeg failed creating clip.mp4");

        let meta_path = root.join("clip.json");
        std::fs::write(
            &meta_path,
            r#"{
  "source": "clip.mp4",
  "keyframes": "clip.keys.json",
  "screen": [32, 24],
  "position": [16, 12],
  "anchor": [32, 24],
  "scale": 0.5,
  "viewbox": [0, 0, 32, 24],
  "anchor_x_range": [0, 64],
  "anchor_y_range": [0, 48]
}"#,
        )?;
        Ok(meta_path)
    }

    #[test]
    fn open_decimates_high_rate_source() {
        if !ffmpeg_tools_available() {
            return;
        }
        let root = temp_root("media_open");
        let meta_path = synth_project(&root).unwrap();

        let project = Project::open(&meta_path).unwrap();
        assert_eq!(project.fps(), 30.0);
        // 60 frames at d = 2, minus the dropped final group.
        assert_eq!(project.total_frames(), 29);
        assert_eq!(project.meta().source_wh, Some([64, 48]));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn cached_random_access_matches_sequential_decode() {
        if !ffmpeg_tools_available() {
            return;
        }
        let root = temp_root("media_prefetch");
        let meta_path = synth_project(&root).unwrap();

        let mut sequential = Vec::new();
        {
            let project = Project::open(&meta_path).unwrap();
            let total = project.total_frames();
            let mut session = project.into_session(CacheConfig::new(40, 5)).unwrap();
            while sequential.len() < total as usize {
                let frame = session.current_frame().unwrap().clone();
                sequential.push(frame);
                session.step(1).unwrap();
            }
        }

        let project = Project::open(&meta_path).unwrap();
        let total = project.total_frames();
        let mut session = project.into_session(CacheConfig::new(8, 5)).unwrap();
        for i in [20i64, 19, 18, 3, 25, 24, 10, 11] {
            assert!(session.load_frame(i, false).unwrap(), "frame {i}");
            let got = session.current_frame().unwrap();
            assert_eq!(got, &sequential[i as usize], "frame {i}");
        }
        assert!(session.cache().len() <= 8);
        assert_eq!(session.total_frames(), total);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn export_writes_playable_video() {
        if !ffmpeg_tools_available() {
            return;
        }
        let root = temp_root("media_export");
        let meta_path = synth_project(&root).unwrap();
        let out = root.join("out").join("retracked.mp4");

        let project = Project::open(&meta_path).unwrap();
        let stats = project
            .export(
                out.to_str().unwrap(),
                &mut FfmpegSinkFactory,
                &ExportOpts::default(),
            )
            .unwrap();
        assert_eq!(stats.frames_written, 29);
        assert_eq!(stats.segments, 1);

        let info = retrack::source::ffmpeg::probe_video(&out).unwrap();
        assert_eq!((info.width, info.height), (32, 24));
        assert!(info.frame_count > 0);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn frame_cache_over_ffmpeg_reads_every_frame_forward() {
        if !ffmpeg_tools_available() {
            return;
        }
        let root = temp_root("media_forward");
        synth_project(&root).unwrap();

        let src = retrack::FfmpegSource::open(&root.join("clip.mp4")).unwrap();
        let total = src.info().frame_count;
        let mut cache = FrameCache::new(src, total, CacheConfig::new(4, 5));
        let mut n = 0;
        while cache.read(None).unwrap().is_some() {
            n += 1;
        }
        assert_eq!(n, total);
        assert_eq!(cache.source().tell(), total);

        let _ = std::fs::remove_dir_all(&root);
    }
}
