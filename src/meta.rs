//! The meta descriptor and keyframe store on disk.
//!
//! Both files are pretty-printed JSON with sorted keys. Saving skips identical content and
//! keeps the previous version as `<name>.bak`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::{
    composite::Compositor,
    core::{Anchor, Point, Range1, Rect},
    error::{RetrackError, RetrackResult},
};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Meta {
    pub source: String,
    pub keyframes: String,
    pub screen: [u32; 2],
    pub position: [f64; 2],
    pub anchor: [f64; 2],
    pub scale: f64,
    pub viewbox: [f64; 4],
    pub anchor_x_range: Range1,
    pub anchor_y_range: Range1,
    /// Export path smoothing in seconds; absent or zero disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_framecount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_wh: Option<[u32; 2]>,

    /// Fields this crate does not interpret, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    /// Directory relative `source`/`keyframes` paths resolve against.
    #[serde(skip)]
    base_dir: PathBuf,

    #[serde(skip)]
    loaded: LoadedDoc,
}

/// The document as parsed, so saving can keep its number spelling. Not part of the
/// descriptor's value: two metas with equal fields compare equal whatever they were read
/// from.
#[derive(Clone, Debug, Default)]
struct LoadedDoc(Option<serde_json::Value>);

impl PartialEq for LoadedDoc {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Meta {
    pub fn from_json_str(s: &str, base_dir: impl Into<PathBuf>) -> RetrackResult<Self> {
        let loaded: serde_json::Value = serde_json::from_str(s)?;
        let mut meta: Meta = serde_json::from_value(loaded.clone())?;
        meta.base_dir = base_dir.into();
        meta.loaded = LoadedDoc(Some(loaded));
        meta.validate()?;
        Ok(meta)
    }

    pub fn load(path: &Path) -> RetrackResult<Self> {
        if !path.exists() {
            return Err(RetrackError::validation(format!(
                "meta file '{}' does not exist",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read meta file '{}'", path.display()))?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json_str(&text, base)
    }

    pub fn validate(&self) -> RetrackResult<()> {
        if self.screen[0] == 0 || self.screen[1] == 0 {
            return Err(RetrackError::validation("screen width/height must be > 0"));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(RetrackError::validation("scale must be finite and > 0"));
        }
        if self.source.trim().is_empty() {
            return Err(RetrackError::validation("source must be non-empty"));
        }
        if self.keyframes.trim().is_empty() {
            return Err(RetrackError::validation("keyframes must be non-empty"));
        }
        if let Some(sigma) = self.sigma
            && (!sigma.is_finite() || sigma < 0.0)
        {
            return Err(RetrackError::validation("sigma must be finite and >= 0"));
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn source_path(&self) -> PathBuf {
        self.resolve(&self.source)
    }

    pub fn keyframes_path(&self) -> PathBuf {
        self.resolve(&self.keyframes)
    }

    fn resolve(&self, p: &str) -> PathBuf {
        let p = Path::new(p);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen[0], self.screen[1])
    }

    pub fn default_anchor(&self) -> Anchor {
        Anchor::new(self.anchor[0], self.anchor[1])
    }

    pub fn sigma(&self) -> f64 {
        self.sigma.unwrap_or(0.0)
    }

    pub fn compositor(&self) -> RetrackResult<Compositor> {
        let [x0, y0, x1, y1] = self.viewbox;
        Compositor::new(
            self.screen[0],
            self.screen[1],
            Point::new(self.position[0], self.position[1]),
            self.scale,
            Rect::new(x0, y0, x1, y1),
        )
    }

    /// Record the properties of the opened source so they persist with the descriptor.
    pub fn set_source_info(&mut self, fps: f64, frame_count: u64, width: u32, height: u32) {
        self.source_fps = Some(fps);
        self.source_framecount = Some(frame_count);
        self.source_wh = Some([width, height]);
    }

    pub fn to_json_string(&self) -> RetrackResult<String> {
        // Going through `Value` sorts keys, including the flattened extras.
        let mut value = serde_json::to_value(self)?;
        if let Some(loaded) = &self.loaded.0 {
            keep_loaded_numbers(&mut value, loaded);
        }
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

/// Where `value` holds the same number as `loaded`, take `loaded`'s spelling; `320` stays
/// `320` instead of becoming `320.0`.
fn keep_loaded_numbers(value: &mut serde_json::Value, loaded: &serde_json::Value) {
    use serde_json::Value;
    match (value, loaded) {
        (Value::Number(n), Value::Number(m)) if n.as_f64() == m.as_f64() => *n = m.clone(),
        (Value::Array(items), Value::Array(old)) if items.len() == old.len() => {
            for (item, old) in items.iter_mut().zip(old) {
                keep_loaded_numbers(item, old);
            }
        }
        (Value::Object(fields), Value::Object(old)) => {
            for (key, field) in fields.iter_mut() {
                if let Some(old) = old.get(key) {
                    keep_loaded_numbers(field, old);
                }
            }
        }
        _ => {}
    }
}

/// Keyframes from `path`, or all-absent when the file does not exist yet.
pub fn load_keyframes(path: &Path, total_frames: usize) -> RetrackResult<Vec<Option<Anchor>>> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no keyframe file, starting empty");
        return Ok(vec![None; total_frames]);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read keyframes '{}'", path.display()))?;
    let raw: Vec<Option<[f64; 2]>> = serde_json::from_str(&text)?;
    if raw.len() != total_frames {
        return Err(RetrackError::validation(format!(
            "keyframe file '{}' has {} entries, source has {total_frames} frames",
            path.display(),
            raw.len()
        )));
    }
    Ok(raw
        .into_iter()
        .map(|e| e.map(|[x, y]| Anchor::new(x, y)))
        .collect())
}

pub fn keyframes_to_json(entries: &[Option<Anchor>]) -> RetrackResult<String> {
    let raw: Vec<Option<[f64; 2]>> = entries.iter().map(|e| e.map(|a| [a.x, a.y])).collect();
    Ok(serde_json::to_string_pretty(&raw)?)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The file already holds exactly this content.
    Unchanged,
    /// The confirmation callback said no.
    Declined,
    Written { backup: Option<PathBuf> },
}

impl SaveOutcome {
    pub fn was_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

/// Write `contents` to `path` unless it is already there.
///
/// `confirm` is asked before anything touches the disk. An existing file is renamed to
/// [`backup_path`] first, replacing any older backup.
pub fn save_if_changed(
    path: &Path,
    contents: &str,
    confirm: impl FnOnce(&Path) -> bool,
) -> RetrackResult<SaveOutcome> {
    let exists = path.exists();
    if exists {
        let current = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        if current == contents {
            return Ok(SaveOutcome::Unchanged);
        }
    }
    if !confirm(path) {
        return Ok(SaveOutcome::Declined);
    }

    let backup = if exists {
        let bak = backup_path(path);
        if bak.exists() {
            std::fs::remove_file(&bak)
                .with_context(|| format!("failed to remove old backup '{}'", bak.display()))?;
        }
        std::fs::rename(path, &bak)
            .with_context(|| format!("failed to back up '{}'", path.display()))?;
        Some(bak)
    } else {
        None
    };

    std::fs::write(path, contents)
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    tracing::info!(path = %path.display(), "saved");
    Ok(SaveOutcome::Written { backup })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveReport {
    pub meta: SaveOutcome,
    pub keyframes: SaveOutcome,
}

/// Save the descriptor to `meta_path` and the keyframes next to wherever it points.
pub fn save_all(
    meta_path: &Path,
    meta: &Meta,
    entries: &[Option<Anchor>],
    confirm: &mut dyn FnMut(&Path) -> bool,
) -> RetrackResult<SaveReport> {
    let meta_out = save_if_changed(meta_path, &meta.to_json_string()?, &mut *confirm)?;
    let keys_out = save_if_changed(
        &meta.keyframes_path(),
        &keyframes_to_json(entries)?,
        &mut *confirm,
    )?;
    Ok(SaveReport {
        meta: meta_out,
        keyframes: keys_out,
    })
}
