use std::{
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use crate::{
    core::{Frame, rgba_len},
    error::{RetrackError, RetrackResult},
};

/// Destination for rendered frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> RetrackResult<()>;
    fn finish(self: Box<Self>) -> RetrackResult<()>;
}

/// Opens one sink per output file; export calls it again on every segment rotation.
pub trait SinkFactory {
    fn open(&mut self, cfg: &EncodeConfig) -> RetrackResult<Box<dyn FrameSink>>;
}

#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub out_path: PathBuf,
    pub overwrite: bool,
}

impl EncodeConfig {
    pub fn validate(&self) -> RetrackResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RetrackError::validation(
                "encode width/height must be non-zero",
            ));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(RetrackError::validation("encode fps must be positive"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(RetrackError::validation(
                "encode width/height must be even (required for yuv420p output)",
            ));
        }
        Ok(())
    }
}

pub fn default_mp4_config(
    out_path: impl Into<PathBuf>,
    width: u32,
    height: u32,
    fps: f64,
) -> EncodeConfig {
    EncodeConfig {
        width,
        height,
        fps,
        out_path: out_path.into(),
        overwrite: true,
    }
}

pub fn is_ffmpeg_on_path() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> RetrackResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// True when `pattern` holds a `%d` or `%0Nd` placeholder.
pub fn has_segment_pattern(pattern: &str) -> bool {
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            continue;
        }
        while chars.peek().is_some_and(char::is_ascii_digit) {
            chars.next();
        }
        if chars.peek() == Some(&'d') {
            return true;
        }
    }
    false
}

/// Substitutes `seq` into every `%d` / `%0Nd` placeholder; `%%` becomes `%`. Anything else
/// after a `%` is kept literally.
pub fn segment_path(pattern: &str, seq: u32) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut digits = String::new();
        while let Some(&d) = chars.peek()
            && d.is_ascii_digit()
        {
            digits.push(d);
            chars.next();
        }
        if chars.peek() == Some(&'d') {
            chars.next();
            let width = digits.parse::<usize>().unwrap_or(0);
            if digits.starts_with('0') {
                out.push_str(&format!("{seq:0width$}"));
            } else {
                out.push_str(&format!("{seq:width$}"));
            }
        } else {
            out.push('%');
            out.push_str(&digits);
        }
    }
    out
}

/// Pipes raw RGBA into a system `ffmpeg` running libx264.
pub struct FfmpegEncoder {
    cfg: EncodeConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    scratch: Vec<u8>,
}

impl FfmpegEncoder {
    pub fn new(cfg: EncodeConfig) -> RetrackResult<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;

        if !cfg.overwrite && cfg.out_path.exists() {
            return Err(RetrackError::validation(format!(
                "output file '{}' already exists",
                cfg.out_path.display()
            )));
        }

        if !is_ffmpeg_on_path() {
            return Err(RetrackError::encode(
                "ffmpeg is required for export, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if cfg.overwrite {
            cmd.arg("-y");
        } else {
            cmd.arg("-n");
        }

        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-crf",
            "15",
            "-preset",
            "ultrafast",
        ])
        .arg(&cfg.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            RetrackError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RetrackError::encode("failed to open ffmpeg stdin (unexpected)"))?;

        tracing::debug!(path = %cfg.out_path.display(), "spawned ffmpeg encoder");
        Ok(Self {
            scratch: vec![0u8; rgba_len(cfg.width, cfg.height)?],
            cfg,
            child: Some(child),
            stdin: Some(stdin),
        })
    }
}

impl FrameSink for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> RetrackResult<()> {
        if frame.width != self.cfg.width || frame.height != self.cfg.height {
            return Err(RetrackError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.cfg.width, self.cfg.height
            )));
        }

        flatten_to_opaque_rgba8(&mut self.scratch, &frame.data)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(RetrackError::encode("ffmpeg encoder is already finalized"));
        };

        use std::io::Write as _;
        stdin.write_all(&self.scratch).map_err(|e| {
            RetrackError::encode(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;

        Ok(())
    }

    fn finish(mut self: Box<Self>) -> RetrackResult<()> {
        drop(self.stdin.take());

        let child = self
            .child
            .take()
            .ok_or_else(|| RetrackError::encode("ffmpeg encoder is already finalized"))?;
        let output = child.wait_with_output().map_err(|e| {
            RetrackError::encode(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RetrackError::encode(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// An encoder dropped without [`FrameSink::finish`] kills and reaps its ffmpeg child.
impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Opens an [`FfmpegEncoder`] per segment.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegSinkFactory;

impl SinkFactory for FfmpegSinkFactory {
    fn open(&mut self, cfg: &EncodeConfig) -> RetrackResult<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegEncoder::new(cfg.clone())?))
    }
}

/// Composites straight-alpha RGBA over black.
fn flatten_to_opaque_rgba8(dst: &mut [u8], src: &[u8]) -> RetrackResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(RetrackError::validation(
            "frame.data size mismatch with width*height*4",
        ));
    }

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }
        d[0] = mul_div255(u16::from(s[0]), a) as u8;
        d[1] = mul_div255(u16::from(s[1]), a) as u8;
        d[2] = mul_div255(u16::from(s[2]), a) as u8;
        d[3] = 255;
    }

    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}
