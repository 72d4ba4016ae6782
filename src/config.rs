use crate::model::PersistedState;
use crate::progress::EofThresholds;
use crate::sequencer::LoadTimings;
use crate::thumbnails::ThumbnailSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "cadre";
const STATE_FILE: &str = "state.json";
const LOG_FILE: &str = "cadre.log";
const THUMBNAIL_DIR: &str = "thumbnails";

/// Timing knobs that were tuned by hand against one engine. They live in the
/// state file so a different engine can be recalibrated without a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Tuning {
    #[serde(default)]
    pub eof: EofThresholds,
    #[serde(default)]
    pub load: LoadTimings,
    #[serde(default)]
    pub thumbnails: ThumbnailSettings,
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("CADRE_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn state_path() -> Result<PathBuf> {
    Ok(config_root()?.join(STATE_FILE))
}

pub fn log_path() -> Result<PathBuf> {
    Ok(config_root()?.join(LOG_FILE))
}

pub fn thumbnail_dir() -> Result<PathBuf> {
    Ok(config_root()?.join(THUMBNAIL_DIR))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

pub fn load_state() -> Result<PersistedState> {
    load_state_from(&state_path()?)
}

pub fn load_state_from(path: &Path) -> Result<PersistedState> {
    if !path.exists() {
        return Ok(PersistedState::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let state: PersistedState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse state file {}", path.display()))?;
    Ok(state)
}

pub fn save_state(state: &PersistedState) -> Result<()> {
    ensure_config_dir()?;
    save_state_to(&state_path()?, state)
}

pub fn save_state_to(path: &Path, state: &PersistedState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    strip_windows_verbatim_prefix(&canonical)
}

pub fn strip_windows_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();

    if let Some(trimmed) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{trimmed}"));
    }

    if let Some(trimmed) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(trimmed);
    }

    path.to_path_buf()
}

/// True for references the engine has to fetch over the network.
pub fn is_stream_reference(media: &str) -> bool {
    let lower = media.trim_start().to_ascii_lowercase();
    ["http://", "https://", "rtmp://", "rtsp://", "ytdl://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}
