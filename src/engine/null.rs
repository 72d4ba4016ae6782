use super::{
    EndReason, EngineEvent, MediaEngine, PropertyValue, TrackInfo, TrackKind, props, unsupported,
};
use crate::probe::{DurationProbe, TagDurationProbe};
use anyhow::Result;
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

/// Silent engine used when no audio output can be opened. It keeps a wall
/// clock per item so the rest of the player behaves as if media were playing.
pub struct NullEngine {
    paused: bool,
    current: Option<String>,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    volume: f64,
    muted: bool,
    speed: f64,
    end_reported: bool,
    events: VecDeque<EngineEvent>,
}

impl NullEngine {
    pub fn new() -> Self {
        Self {
            paused: true,
            current: None,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            volume: 100.0,
            muted: false,
            speed: 1.0,
            end_reported: false,
            events: VecDeque::new(),
        }
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.current.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed().mul_f64(self.speed));
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }

    fn freeze_clock(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for NullEngine {
    fn load(&mut self, media: &str, start_paused: bool) -> Result<()> {
        self.current = Some(media.to_string());
        self.paused = start_paused;
        self.started_at = (!start_paused).then(Instant::now);
        self.position_offset = Duration::ZERO;
        self.track_duration = TagDurationProbe
            .probe(Path::new(media))
            .map(Duration::from_secs_f64);
        self.end_reported = false;
        self.events.push_back(EngineEvent::StartFile);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.current.take().is_some() {
            self.events.push_back(EngineEvent::EndFile {
                reason: EndReason::Stop,
            });
        }
        self.paused = true;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
        Ok(())
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        if self.current.is_none() {
            anyhow::bail!("no active media");
        }
        let mut target = Duration::from_secs_f64(seconds.max(0.0));
        if let Some(duration) = self.track_duration {
            target = target.min(duration);
        }
        self.position_offset = target;
        self.started_at = (!self.paused).then(Instant::now);
        self.end_reported = false;
        Ok(())
    }

    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<()> {
        match (name, value) {
            (props::PAUSE, PropertyValue::Flag(paused)) => {
                if *paused && !self.paused {
                    self.freeze_clock();
                } else if !*paused && self.paused {
                    self.started_at = Some(Instant::now());
                }
                self.paused = *paused;
            }
            (props::VOLUME, PropertyValue::Number(volume)) => self.volume = volume.clamp(0.0, 130.0),
            (props::MUTE, PropertyValue::Flag(muted)) => self.muted = *muted,
            (props::SPEED, PropertyValue::Number(speed)) => {
                self.freeze_clock();
                self.speed = speed.clamp(0.1, 4.0);
                if !self.paused {
                    self.started_at = Some(Instant::now());
                }
            }
            (props::TIME_POS, PropertyValue::Number(seconds)) => self.seek(*seconds)?,
            (
                props::VIDEO_ZOOM
                | props::VIDEO_PAN_X
                | props::VIDEO_PAN_Y
                | props::VIDEO_ROTATE
                | props::BRIGHTNESS
                | props::CONTRAST
                | props::SATURATION
                | props::GAMMA,
                PropertyValue::Number(_),
            ) => {}
            (props::VIDEO_ASPECT, PropertyValue::Text(_)) => {}
            _ => return Err(unsupported(name)),
        }
        Ok(())
    }

    fn get_property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            props::PAUSE => Some(PropertyValue::Flag(self.paused)),
            props::VOLUME => Some(PropertyValue::Number(self.volume)),
            props::MUTE => Some(PropertyValue::Flag(self.muted)),
            props::SPEED => Some(PropertyValue::Number(self.speed)),
            props::TIME_POS => {
                self.current.as_ref()?;
                Some(PropertyValue::Number(self.current_position().as_secs_f64()))
            }
            props::DURATION => self
                .track_duration
                .map(|duration| PropertyValue::Number(duration.as_secs_f64())),
            props::PATH => self.current.clone().map(PropertyValue::Text),
            _ => None,
        }
    }

    fn video_dimensions(&self) -> Option<(u32, u32)> {
        None
    }

    fn chapters(&self) -> Vec<f64> {
        Vec::new()
    }

    fn tracks(&self, _kind: TrackKind) -> Vec<TrackInfo> {
        Vec::new()
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        let finished = self.current.is_some()
            && self
                .track_duration
                .is_some_and(|duration| self.current_position() >= duration);
        if finished && !self.end_reported {
            self.end_reported = true;
            self.events.push_back(EngineEvent::EndFile {
                reason: EndReason::Eof,
            });
        }
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaded_paused_media_does_not_advance() {
        let mut engine = NullEngine::new();
        engine.load("missing.mkv", true).expect("load");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            engine.get_property(props::TIME_POS),
            Some(PropertyValue::Number(0.0))
        );
        assert_eq!(engine.poll_event(), Some(EngineEvent::StartFile));
    }

    #[test]
    fn seek_requires_media() {
        let mut engine = NullEngine::new();
        assert!(engine.seek(3.0).is_err());
        engine.load("missing.mkv", true).expect("load");
        engine.seek(3.0).expect("seek");
        assert_eq!(
            engine.get_property(props::TIME_POS),
            Some(PropertyValue::Number(3.0))
        );
    }

    #[test]
    fn unknown_properties_are_rejected() {
        let mut engine = NullEngine::new();
        assert!(engine
            .set_property("sub-font-size", &PropertyValue::Number(40.0))
            .is_err());
    }
}
