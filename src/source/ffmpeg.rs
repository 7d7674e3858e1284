use std::{
    io::Read as _,
    path::{Path, PathBuf},
    process::{Child, ChildStdout},
};

use crate::{
    core::{Frame, rgba_len},
    error::{RetrackError, RetrackResult},
    source::FrameSource,
};

#[derive(Clone, Debug)]
pub struct VideoSourceInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub frame_count: u64,
}

impl VideoSourceInfo {
    pub fn source_fps(&self) -> f64 {
        if self.fps_den == 0 {
            0.0
        } else {
            f64::from(self.fps_num) / f64::from(self.fps_den)
        }
    }
}

/// Decodes a media file by streaming raw RGBA out of the system `ffmpeg` binary.
///
/// The child process only ever moves forward; [`FrameSource::seek`] drops it and the next
/// grab restarts decoding at the new position.
pub struct FfmpegSource {
    info: VideoSourceInfo,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    start: u64,
    grabbed: u64,
    exhausted: bool,
    frame_buf: Vec<u8>,
    has_frame: bool,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> RetrackResult<Self> {
        if !path.exists() {
            return Err(RetrackError::validation(format!(
                "source media '{}' does not exist",
                path.display()
            )));
        }
        let info = probe_video(path)?;
        Self::from_info(info)
    }

    pub fn from_info(info: VideoSourceInfo) -> RetrackResult<Self> {
        let len = rgba_len(info.width, info.height)?;
        if len == 0 {
            return Err(RetrackError::decode(
                "decoded video frame size is zero (invalid source dimensions)",
            ));
        }
        Ok(Self {
            info,
            child: None,
            stdout: None,
            start: 0,
            grabbed: 0,
            exhausted: false,
            frame_buf: vec![0u8; len],
            has_frame: false,
        })
    }

    pub fn info(&self) -> &VideoSourceInfo {
        &self.info
    }

    fn ensure_running(&mut self) -> RetrackResult<()> {
        if self.stdout.is_some() {
            return Ok(());
        }
        let mut child = spawn_decoder(&self.info, self.start)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RetrackError::decode("failed to open ffmpeg stdout (unexpected)"))?;
        tracing::debug!(start = self.start, "spawned ffmpeg decoder");
        self.child = Some(child);
        self.stdout = Some(stdout);
        Ok(())
    }

    fn stop(&mut self) {
        drop(self.stdout.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameSource for FfmpegSource {
    fn grab(&mut self) -> RetrackResult<bool> {
        self.has_frame = false;
        if self.exhausted {
            return Ok(false);
        }
        self.ensure_running()?;
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(false);
        };
        match stdout.read_exact(&mut self.frame_buf) {
            Ok(()) => {
                self.grabbed += 1;
                self.has_frame = true;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                self.stop();
                Ok(false)
            }
            Err(e) => Err(RetrackError::decode(format!(
                "failed to read frame from ffmpeg for '{}': {e}",
                self.info.source_path.display()
            ))),
        }
    }

    fn retrieve(&mut self) -> RetrackResult<Option<Frame>> {
        if !self.has_frame {
            return Ok(None);
        }
        Frame::new(self.info.width, self.info.height, self.frame_buf.clone()).map(Some)
    }

    fn seek(&mut self, pos: u64) -> RetrackResult<()> {
        self.stop();
        self.start = pos;
        self.grabbed = 0;
        self.exhausted = false;
        self.has_frame = false;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.start + self.grabbed
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn is_ffprobe_on_path() -> bool {
    std::process::Command::new("ffprobe")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(feature = "media-ffmpeg")]
pub fn probe_video(source_path: &Path) -> RetrackResult<VideoSourceInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        r_frame_rate: Option<String>,
        nb_frames: Option<String>,
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| RetrackError::decode(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(RetrackError::decode(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| RetrackError::decode(format!("ffprobe json parse failed: {e}")))?;
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| RetrackError::decode("no video stream found"))?;
    let width = video_stream
        .width
        .ok_or_else(|| RetrackError::decode("missing video width from ffprobe"))?;
    let height = video_stream
        .height
        .ok_or_else(|| RetrackError::decode("missing video height from ffprobe"))?;

    let (fps_num, fps_den) = parse_ff_ratio(video_stream.r_frame_rate.as_deref().unwrap_or("0/1"))
        .filter(|&(num, _)| num > 0)
        .ok_or_else(|| RetrackError::decode("invalid video r_frame_rate"))?;

    let frame_count = match video_stream
        .nb_frames
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
    {
        Some(n) if n > 0 => n,
        _ => {
            let duration_sec = video_stream
                .duration
                .as_deref()
                .or(parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            let fps = f64::from(fps_num) / f64::from(fps_den);
            (duration_sec * fps).floor().max(0.0) as u64
        }
    };

    Ok(VideoSourceInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        fps_num,
        fps_den,
        frame_count,
    })
}

#[cfg(not(feature = "media-ffmpeg"))]
pub fn probe_video(_source_path: &Path) -> RetrackResult<VideoSourceInfo> {
    Err(RetrackError::evaluation(
        "video sources require the 'media-ffmpeg' feature",
    ))
}

#[cfg(feature = "media-ffmpeg")]
fn spawn_decoder(info: &VideoSourceInfo, start: u64) -> RetrackResult<Child> {
    use std::process::{Command, Stdio};

    let mut cmd = Command::new("ffmpeg");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .args(["-v", "error"]);

    if start > 0 {
        // Half a frame early so timestamp rounding never skips the target frame.
        let fps = info.source_fps();
        let t = ((start as f64 - 0.5) / fps).max(0.0);
        cmd.args(["-ss", &format!("{t:.9}")]);
    }

    cmd.arg("-i")
        .arg(&info.source_path)
        .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"]);

    cmd.spawn().map_err(|e| {
        RetrackError::decode(format!(
            "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
        ))
    })
}

#[cfg(not(feature = "media-ffmpeg"))]
fn spawn_decoder(_info: &VideoSourceInfo, _start: u64) -> RetrackResult<Child> {
    Err(RetrackError::evaluation(
        "video sources require the 'media-ffmpeg' feature",
    ))
}

fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.split('/');
    let a = parts.next()?.trim().parse::<u32>().ok()?;
    let b = match parts.next() {
        Some(b) => b.trim().parse::<u32>().ok()?,
        None => 1,
    };
    if b == 0 {
        return None;
    }
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ff_ratio_parses_fractions_and_integers() {
        assert_eq!(parse_ff_ratio("30000/1001"), Some((30000, 1001)));
        assert_eq!(parse_ff_ratio("25"), Some((25, 1)));
        assert_eq!(parse_ff_ratio("1/0"), None);
        assert_eq!(parse_ff_ratio("abc"), None);
    }

    #[test]
    fn source_fps_handles_zero_den() {
        let info = VideoSourceInfo {
            source_path: PathBuf::from("a.mp4"),
            width: 2,
            height: 2,
            fps_num: 60,
            fps_den: 0,
            frame_count: 0,
        };
        assert_eq!(info.source_fps(), 0.0);
    }

    #[test]
    fn open_missing_file_is_validation_error() {
        let err = FfmpegSource::open(Path::new("definitely/not/here.mp4"))
            .err()
            .unwrap();
        assert!(matches!(err, RetrackError::Validation(_)));
    }

    #[test]
    fn seek_without_decoding_reports_position() {
        let info = VideoSourceInfo {
            source_path: PathBuf::from("unused.mp4"),
            width: 4,
            height: 2,
            fps_num: 25,
            fps_den: 1,
            frame_count: 10,
        };
        let mut src = FfmpegSource::from_info(info).unwrap();
        src.seek(7).unwrap();
        assert_eq!(src.tell(), 7);
        assert!(src.retrieve().unwrap().is_none());
    }
}
