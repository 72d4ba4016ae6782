//! Single choke point for engine writes.
//!
//! The engine goes through transient invalid states while it loads or unloads
//! media. Writes during those windows are refused, never queued; callers
//! re-issue them on the next relevant event.

use crate::engine::{MediaEngine, PropertyValue, props};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub allow_during_busy: bool,
    pub min_interval: Duration,
}

impl WriteOptions {
    pub const fn forced() -> Self {
        Self {
            allow_during_busy: true,
            min_interval: Duration::ZERO,
        }
    }

    pub const fn throttled(min_interval: Duration) -> Self {
        Self {
            allow_during_busy: false,
            min_interval,
        }
    }
}

pub struct EngineGateway<E: MediaEngine> {
    engine: E,
    shutting_down: bool,
    busy: bool,
    unsafe_until: Option<Instant>,
    last_write: HashMap<String, Instant>,
    failing: HashSet<String>,
}

impl<E: MediaEngine> EngineGateway<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            shutting_down: false,
            busy: false,
            unsafe_until: None,
            last_write: HashMap::new(),
            failing: HashSet::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn in_unsafe_window(&self, now: Instant) -> bool {
        self.unsafe_until.is_some_and(|until| now < until)
    }

    /// Marks the engine busy and opens the post-load window in which reads are
    /// unreliable and ordinary writes are refused.
    pub fn begin_load(&mut self, now: Instant, unsafe_window: Duration) {
        self.busy = true;
        self.unsafe_until = Some(now + unsafe_window);
    }

    pub fn clear_busy(&mut self) {
        if self.busy {
            debug!("engine settled");
        }
        self.busy = false;
    }

    pub fn shutdown(&mut self) {
        self.shutting_down = true;
    }

    /// Writes `value` to `name`. Returns true only when the engine accepted it.
    pub fn set_property(
        &mut self,
        name: &str,
        value: impl Into<PropertyValue>,
        options: WriteOptions,
        now: Instant,
    ) -> bool {
        if self.shutting_down {
            return false;
        }
        if !options.allow_during_busy && (self.busy || self.in_unsafe_window(now)) {
            debug!(property = name, "write suppressed while engine is busy");
            return false;
        }
        if !options.min_interval.is_zero()
            && self
                .last_write
                .get(name)
                .is_some_and(|last| now.saturating_duration_since(*last) < options.min_interval)
        {
            return false;
        }

        let value = value.into();
        match self.engine.set_property(name, &value) {
            Ok(()) => {
                self.failing.remove(name);
                self.last_write.insert(name.to_string(), now);
                true
            }
            Err(err) => {
                if self.failing.insert(name.to_string()) {
                    warn!(property = name, %value, "engine rejected property write: {err:#}");
                }
                false
            }
        }
    }

    /// Issues a load. Loads bypass the busy gate: they are what opens it.
    pub fn load(&mut self, media: &str, start_paused: bool) -> Result<()> {
        if self.shutting_down {
            anyhow::bail!("engine is shutting down");
        }
        self.engine.load(media, start_paused)
    }

    pub fn seek(&mut self, seconds: f64, allow_during_busy: bool, now: Instant) -> Result<()> {
        if self.shutting_down {
            anyhow::bail!("engine is shutting down");
        }
        if !allow_during_busy && (self.busy || self.in_unsafe_window(now)) {
            anyhow::bail!("engine is busy loading");
        }
        self.engine.seek(seconds)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.engine.stop()
    }

    pub fn get_property(&self, name: &str) -> Option<PropertyValue> {
        self.engine.get_property(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get_property(name)
            .and_then(|value| value.as_f64())
            .filter(|value| value.is_finite())
    }

    pub fn position(&self) -> Option<f64> {
        self.get_f64(props::TIME_POS)
    }

    pub fn duration(&self) -> Option<f64> {
        self.get_f64(props::DURATION).filter(|value| *value > 0.0)
    }

    pub fn path(&self) -> Option<String> {
        self.get_property(props::PATH)
            .and_then(|value| value.as_str().map(ToOwned::to_owned))
    }

    pub fn video_dimensions(&self) -> Option<(u32, u32)> {
        self.engine
            .video_dimensions()
            .filter(|(width, height)| *width > 0 && *height > 0)
    }

    pub fn is_paused(&self) -> bool {
        self.get_property(props::PAUSE)
            .and_then(|value| value.as_bool())
            .unwrap_or(true)
    }

    /// A successful read after the unsafe window proves the engine settled.
    pub fn note_read(&mut self, now: Instant) {
        if self.busy && !self.in_unsafe_window(now) {
            self.clear_busy();
        }
    }
}
