use crate::config::Tuning;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

pub const SPEED_STEPS: [f64; 5] = [0.5, 0.75, 1.0, 1.5, 2.0];
pub const ASPECT_RATIOS: [&str; 6] = ["auto", "16:9", "4:3", "16:10", "2.35:1", "2.39:1"];
/// Brightness, contrast, saturation and gamma all live in `-100..=100`.
pub const ADJUSTMENT_LIMIT: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::One,
            Self::One => Self::All,
            Self::All => Self::Off,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "Repeat Off",
            Self::One => "Repeat One",
            Self::All => "Repeat All",
        }
    }
}

// Stored as the integer the settings file has always used (0 = off, 1 = one, 2 = all).
impl Serialize for RepeatMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let raw = match self {
            Self::Off => 0_u8,
            Self::One => 1,
            Self::All => 2,
        };
        serializer.serialize_u8(raw)
    }
}

impl<'de> Deserialize<'de> for RepeatMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        Ok(match raw {
            1 => Self::One,
            2 => Self::All,
            _ => Self::Off,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamQuality {
    #[default]
    Best,
    P1080,
    P720,
    P480,
    Audio,
}

impl StreamQuality {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "best" => Some(Self::Best),
            "1080" | "1080p" => Some(Self::P1080),
            "720" | "720p" => Some(Self::P720),
            "480" | "480p" => Some(Self::P480),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Format selector handed to the engine's stream loader.
    pub fn format_selector(self) -> &'static str {
        match self {
            Self::Best => "bestvideo+bestaudio/best",
            Self::P1080 => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
            Self::P720 => "bestvideo[height<=720]+bestaudio/best[height<=720]",
            Self::P480 => "bestvideo[height<=480]+bestaudio/best[height<=480]",
            Self::Audio => "bestaudio/best",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Best => "Best",
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::Audio => "Audio only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoAdjustment {
    Brightness,
    Contrast,
    Saturation,
    Gamma,
}

impl VideoAdjustment {
    pub fn label(self) -> &'static str {
        match self {
            Self::Brightness => "Brightness",
            Self::Contrast => "Contrast",
            Self::Saturation => "Saturation",
            Self::Gamma => "Gamma",
        }
    }
}

/// Picture settings reapplied to every load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VideoSettings {
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub gamma: i32,
    pub rotate: u16,
}

impl VideoSettings {
    pub fn get(&self, adjustment: VideoAdjustment) -> i32 {
        let raw = match adjustment {
            VideoAdjustment::Brightness => self.brightness,
            VideoAdjustment::Contrast => self.contrast,
            VideoAdjustment::Saturation => self.saturation,
            VideoAdjustment::Gamma => self.gamma,
        };
        raw.clamp(-ADJUSTMENT_LIMIT, ADJUSTMENT_LIMIT)
    }

    pub fn set(&mut self, adjustment: VideoAdjustment, value: i32) {
        let value = value.clamp(-ADJUSTMENT_LIMIT, ADJUSTMENT_LIMIT);
        match adjustment {
            VideoAdjustment::Brightness => self.brightness = value,
            VideoAdjustment::Contrast => self.contrast = value,
            VideoAdjustment::Saturation => self.saturation = value,
            VideoAdjustment::Gamma => self.gamma = value,
        }
    }

    /// Rotation in degrees; anything but a quarter turn reads as 0.
    pub fn rotation(&self) -> u16 {
        match self.rotate {
            90 | 180 | 270 => self.rotate,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamAuth {
    pub enabled: bool,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub repeat: RepeatMode,
    #[serde(default)]
    pub resume_positions: HashMap<String, f64>,
    #[serde(default)]
    pub stream_quality: StreamQuality,
    #[serde(default)]
    pub stream_auth: StreamAuth,
    #[serde(default)]
    pub window_zoom: f64,
    #[serde(default)]
    pub video: VideoSettings,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default)]
    pub tuning: Tuning,
}

fn default_volume() -> u8 {
    70
}

fn default_aspect_ratio() -> String {
    String::from(ASPECT_RATIOS[0])
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            muted: false,
            shuffle: false,
            repeat: RepeatMode::Off,
            resume_positions: HashMap::new(),
            stream_quality: StreamQuality::default(),
            stream_auth: StreamAuth::default(),
            window_zoom: 0.0,
            video: VideoSettings::default(),
            aspect_ratio: default_aspect_ratio(),
            tuning: Tuning::default(),
        }
    }
}

impl PersistedState {
    /// Saved aspect override, or `auto` when the stored value is unknown.
    pub fn aspect_ratio(&self) -> &str {
        ASPECT_RATIOS
            .iter()
            .find(|ratio| **ratio == self.aspect_ratio)
            .copied()
            .unwrap_or(ASPECT_RATIOS[0])
    }

    pub fn resume_position(&self, media: &str) -> f64 {
        self.resume_positions
            .get(media)
            .copied()
            .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
            .unwrap_or(0.0)
    }

    pub fn set_resume_position(&mut self, media: &str, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.resume_positions.insert(media.to_string(), seconds);
        } else {
            self.resume_positions.remove(media);
        }
    }
}
