use crate::config;
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm"];
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "ogg", "m4a", "wma", "alac", "aiff",
];

fn has_extension(path: &Path, known: &[&str]) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    known.iter().any(|supported| ext.eq_ignore_ascii_case(supported))
}

pub fn is_video_file(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

pub fn is_audio_file(path: &Path) -> bool {
    has_extension(path, AUDIO_EXTENSIONS)
}

pub fn is_media_file(path: &Path) -> bool {
    is_video_file(path) || is_audio_file(path)
}

/// `mm:ss`, or `h:mm:ss` past an hour. Unknown or invalid values show `--:--`.
pub fn format_duration(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|value| value.is_finite() && *value >= 0.0) else {
        return String::from("--:--");
    };
    let total = seconds as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// Display name for a playlist entry: the file name, or the URL as given.
pub fn display_name(media: &str) -> String {
    if config::is_stream_reference(media) {
        return media.to_string();
    }
    Path::new(media)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| media.to_string())
}

fn sort_case_insensitive(paths: &mut [PathBuf]) {
    paths.sort_by_cached_key(|path| path.to_string_lossy().to_lowercase());
}

/// Expands files and folders into media file paths. Folder contents are
/// sorted case-insensitively; non-media files are dropped.
pub fn collect_paths(inputs: &[PathBuf], recursive: bool) -> Vec<String> {
    let mut files = Vec::new();
    for input in inputs {
        let resolved = config::normalize_path(input);
        if resolved.is_file() {
            if is_media_file(&resolved) {
                files.push(resolved.to_string_lossy().into_owned());
            }
            continue;
        }
        if !resolved.is_dir() {
            continue;
        }

        let walker = WalkDir::new(&resolved)
            .follow_links(true)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by(|a, b| {
                a.file_name()
                    .to_string_lossy()
                    .to_lowercase()
                    .cmp(&b.file_name().to_string_lossy().to_lowercase())
            });
        let mut found: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && is_media_file(entry.path()))
            .map(|entry| config::normalize_path(entry.path()))
            .collect();
        if recursive {
            sort_case_insensitive(&mut found);
        }
        files.extend(
            found
                .into_iter()
                .map(|path| path.to_string_lossy().into_owned()),
        );
    }
    files
}

/// Writes an extended M3U. A missing `.m3u` extension is appended; the path
/// actually written is returned.
pub fn save_m3u(
    path: &Path,
    items: &[String],
    duration_of: impl Fn(&str) -> Option<f64>,
) -> Result<PathBuf> {
    let path = if path
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("m3u"))
    {
        path.to_path_buf()
    } else {
        let mut raw = path.as_os_str().to_owned();
        raw.push(".m3u");
        PathBuf::from(raw)
    };

    let mut out = String::from("#EXTM3U\n");
    for item in items {
        let seconds = duration_of(item)
            .filter(|secs| *secs > 0.0)
            .map_or(-1, |secs| secs as i64);
        let _ = writeln!(out, "#EXTINF:{seconds},{}", display_name(item));
        let _ = writeln!(out, "{item}");
    }
    fs::write(&path, out).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Reads an M3U. Comments and blanks are skipped, URLs are kept, and paths
/// are kept only if they exist, either as written or relative to the list.
pub fn load_m3u(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read playlist {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut items = Vec::new();
    for line in raw.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if config::is_stream_reference(line) {
            items.push(line.to_string());
            continue;
        }
        let direct = Path::new(line);
        if direct.exists() {
            items.push(line.to_string());
            continue;
        }
        let relative = base.join(line);
        if relative.exists() {
            items.push(config::normalize_path(&relative).to_string_lossy().into_owned());
        }
    }
    Ok(items)
}
