use super::{
    EndReason, EngineEvent, MediaEngine, PropertyValue, TrackInfo, TrackKind, props, unsupported,
    volume_to_gain,
};
use crate::config;
use anyhow::{Context, Result};
use rodio::{Decoder, DeviceSinkBuilder, MixerDeviceSink, Player, Source};
#[cfg(unix)]
use std::ffi::CString;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Audio-only binding on top of a rodio sink.
///
/// Local files only; the engine never learns video dimensions, so loads always
/// take the best-effort path of the sequencer.
pub struct RodioEngine {
    stream: MixerDeviceSink,
    sink: Player,
    current: Option<String>,
    track_duration: Option<Duration>,
    volume: f64,
    muted: bool,
    speed: f64,
    end_reported: bool,
    events: VecDeque<EngineEvent>,
}

impl RodioEngine {
    pub fn new() -> Result<Self> {
        let mut stream = with_silenced_stderr(|| {
            DeviceSinkBuilder::from_default_device()
                .context("failed to open default system output stream")?
                .with_error_callback(|_| {})
                .open_sink_or_fallback()
                .context("failed to start default output stream")
        })?;
        stream.log_on_drop(false);
        let sink = Player::connect_new(stream.mixer());

        Ok(Self {
            stream,
            sink,
            current: None,
            track_duration: None,
            volume: 100.0,
            muted: false,
            speed: 1.0,
            end_reported: false,
            events: VecDeque::new(),
        })
    }

    fn apply_gain(&self) {
        self.sink.set_volume(volume_to_gain(self.volume, self.muted));
    }

    fn check_finished(&mut self) {
        if self.current.is_some() && !self.end_reported && self.sink.empty() {
            self.end_reported = true;
            self.events.push_back(EngineEvent::EndFile {
                reason: EndReason::Eof,
            });
        }
    }
}

impl MediaEngine for RodioEngine {
    fn load(&mut self, media: &str, start_paused: bool) -> Result<()> {
        if config::is_stream_reference(media) {
            anyhow::bail!("network streams are not supported by the audio engine: {media}");
        }

        self.sink.stop();
        self.sink = Player::connect_new(self.stream.mixer());
        self.current = None;
        self.track_duration = None;

        let path = Path::new(media);
        let file =
            File::open(path).with_context(|| format!("failed to open media {}", path.display()))?;
        let source = Decoder::try_from(file)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        self.track_duration = source.total_duration();

        if start_paused {
            self.sink.pause();
        }
        self.sink.append(source);
        self.sink.set_speed(self.speed as f32);
        self.apply_gain();
        self.current = Some(media.to_string());
        self.end_reported = false;
        self.events.push_back(EngineEvent::StartFile);
        debug!(media, paused = start_paused, "rodio engine loaded media");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.sink.stop();
        if self.current.take().is_some() {
            self.events.push_back(EngineEvent::EndFile {
                reason: EndReason::Stop,
            });
        }
        self.track_duration = None;
        self.end_reported = false;
        Ok(())
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        if self.current.is_none() {
            anyhow::bail!("no active media");
        }
        let target = Duration::from_secs_f64(seconds.max(0.0));
        self.sink
            .try_seek(target)
            .map_err(|err| anyhow::anyhow!("failed to seek current media: {err:?}"))?;
        self.end_reported = false;
        Ok(())
    }

    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<()> {
        match (name, value) {
            (props::PAUSE, PropertyValue::Flag(paused)) => {
                if *paused {
                    self.sink.pause();
                } else {
                    self.sink.play();
                }
            }
            (props::VOLUME, PropertyValue::Number(volume)) => {
                self.volume = volume.clamp(0.0, 130.0);
                self.apply_gain();
            }
            (props::MUTE, PropertyValue::Flag(muted)) => {
                self.muted = *muted;
                self.apply_gain();
            }
            (props::SPEED, PropertyValue::Number(speed)) => {
                self.speed = speed.clamp(0.1, 4.0);
                self.sink.set_speed(self.speed as f32);
            }
            (props::TIME_POS, PropertyValue::Number(seconds)) => self.seek(*seconds)?,
            _ => return Err(unsupported(name)),
        }
        Ok(())
    }

    fn get_property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            props::PAUSE => Some(PropertyValue::Flag(self.sink.is_paused())),
            props::VOLUME => Some(PropertyValue::Number(self.volume)),
            props::MUTE => Some(PropertyValue::Flag(self.muted)),
            props::SPEED => Some(PropertyValue::Number(self.speed)),
            props::TIME_POS => {
                self.current.as_ref()?;
                Some(PropertyValue::Number(self.sink.get_pos().as_secs_f64()))
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

    fn tracks(&self, kind: TrackKind) -> Vec<TrackInfo> {
        match (kind, &self.current) {
            (TrackKind::Audio, Some(_)) => vec![TrackInfo {
                id: 1,
                kind,
                title: None,
                language: None,
            }],
            _ => Vec::new(),
        }
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        self.check_finished();
        self.events.pop_front()
    }
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}
