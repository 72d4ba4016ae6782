//! Playback engine capability surface.
//!
//! Everything above this module talks to the engine through [`MediaEngine`]:
//! commands (load, stop, seek), a key-value property surface and a queue of
//! asynchronous notifications. Concrete bindings live in submodules.

mod audio;
mod null;
mod scripted;

pub use audio::RodioEngine;
pub use null::NullEngine;
pub use scripted::ScriptedEngine;

use anyhow::Result;
use std::fmt;

/// Property names understood by the engines in this crate.
pub mod props {
    pub const PAUSE: &str = "pause";
    pub const VOLUME: &str = "volume";
    pub const MUTE: &str = "mute";
    pub const SPEED: &str = "speed";
    pub const TIME_POS: &str = "time-pos";
    pub const DURATION: &str = "duration";
    pub const PATH: &str = "path";
    pub const VIDEO_ZOOM: &str = "video-zoom";
    pub const VIDEO_PAN_X: &str = "video-pan-x";
    pub const VIDEO_PAN_Y: &str = "video-pan-y";
    pub const VIDEO_ROTATE: &str = "video-rotate";
    pub const VIDEO_ASPECT: &str = "video-aspect-override";
    pub const BRIGHTNESS: &str = "brightness";
    pub const CONTRAST: &str = "contrast";
    pub const SATURATION: &str = "saturation";
    pub const GAMMA: &str = "gamma";
    pub const AUDIO_TRACK: &str = "aid";
    pub const SUBTITLE_TRACK: &str = "sid";
    pub const YTDL_FORMAT: &str = "ytdl-format";
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(value) => write!(f, "{}", if *value { "yes" } else { "no" }),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Eof,
    Stop,
    Error,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StartFile,
    EndFile { reason: EndReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Subtitle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: i64,
    pub kind: TrackKind,
    pub title: Option<String>,
    pub language: Option<String>,
}

impl TrackInfo {
    pub fn label(&self) -> String {
        match (&self.title, &self.language) {
            (Some(title), Some(language)) => format!("#{} {title} [{language}]", self.id),
            (Some(name), None) | (None, Some(name)) => format!("#{} {name}", self.id),
            (None, None) => format!("#{}", self.id),
        }
    }
}

pub trait MediaEngine {
    /// Replaces the current media. With `start_paused` the engine must not
    /// start rendering until `pause` is cleared.
    fn load(&mut self, media: &str, start_paused: bool) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn seek(&mut self, seconds: f64) -> Result<()>;
    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<()>;
    fn get_property(&self, name: &str) -> Option<PropertyValue>;
    /// Decoded frame size, once known. Audio-only media never reports one.
    fn video_dimensions(&self) -> Option<(u32, u32)>;
    fn chapters(&self) -> Vec<f64>;
    fn tracks(&self, kind: TrackKind) -> Vec<TrackInfo>;
    fn poll_event(&mut self) -> Option<EngineEvent>;
}

impl<E: MediaEngine + ?Sized> MediaEngine for Box<E> {
    fn load(&mut self, media: &str, start_paused: bool) -> Result<()> {
        (**self).load(media, start_paused)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        (**self).seek(seconds)
    }

    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<()> {
        (**self).set_property(name, value)
    }

    fn get_property(&self, name: &str) -> Option<PropertyValue> {
        (**self).get_property(name)
    }

    fn video_dimensions(&self) -> Option<(u32, u32)> {
        (**self).video_dimensions()
    }

    fn chapters(&self) -> Vec<f64> {
        (**self).chapters()
    }

    fn tracks(&self, kind: TrackKind) -> Vec<TrackInfo> {
        (**self).tracks(kind)
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        (**self).poll_event()
    }
}

/// Engine volume is 0..=100; rodio sinks take a linear gain.
pub(crate) fn volume_to_gain(volume: f64, muted: bool) -> f32 {
    if muted {
        return 0.0;
    }
    (volume / 100.0).clamp(0.0, 1.3) as f32
}

pub(crate) fn unsupported(name: &str) -> anyhow::Error {
    anyhow::anyhow!("property {name} is not supported by this engine")
}
