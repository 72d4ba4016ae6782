//! The UI-thread owner of all playback state.
//!
//! [`Player`] ties the playlist core, the engine gateway, the load sequencer,
//! the progress detector and the background collaborators together. The
//! presentation layer calls its operations and drains [`UiEvent`]s; nothing
//! here blocks or touches the terminal.

use crate::config;
use crate::core::{PlayerCore, Removal, ShuffleState, SortKey};
use crate::engine::{
    EndReason, EngineEvent, MediaEngine, PropertyValue, TrackInfo, TrackKind, props,
};
use crate::gateway::{EngineGateway, WriteOptions};
use crate::model::{
    ADJUSTMENT_LIMIT, ASPECT_RATIOS, PersistedState, SPEED_STEPS, StreamQuality, VideoAdjustment,
};
use crate::playlist;
use crate::probe::{DurationProbe, DurationScanner, TagDurationProbe};
use crate::progress::{PollGate, ProgressDetector, ProgressReading};
use crate::resolver::{ResolveJob, ResolveOptions, UrlResolver, YtDlpResolver, is_direct_media_url};
use crate::scheduler::Scheduler;
use crate::sequencer::{LoadEffect, LoadPhase, LoadSequencer, LoadTask};
use crate::thumbnails::{ThumbnailGenerator, ThumbnailService};
use anyhow::Result;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const STATUS_LIFETIME: Duration = Duration::from_millis(900);
/// Saved positions at or below this are not worth resuming.
const RESUME_MIN_SECS: f64 = 5.0;
/// Positions this close to the end are saved as "finished".
const RESUME_END_GUARD_SECS: f64 = 15.0;
const VIEW_WRITE_INTERVAL: Duration = Duration::from_millis(50);
const ZOOM_LIMIT: f64 = 3.0;
const PAN_LIMIT: f64 = 1.0;

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Status(String),
    Timeline { position: f64, duration: f64 },
    Transport { playing: bool },
    /// Nothing is playing; show the idle background.
    Idle,
    Resize { width: u32, height: u32 },
    Title(String),
    PlaylistChanged,
    Chapters(Vec<f64>),
    Thumbnail(PathBuf),
}

pub struct Collaborators {
    pub probe: Arc<dyn DurationProbe>,
    pub resolver: Arc<dyn UrlResolver>,
    pub thumbnailer: Option<Arc<dyn ThumbnailGenerator>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            probe: Arc::new(TagDurationProbe),
            resolver: Arc::new(YtDlpResolver::new()),
            thumbnailer: None,
        }
    }
}

pub struct Player<E: MediaEngine> {
    core: PlayerCore,
    gateway: EngineGateway<E>,
    sequencer: LoadSequencer,
    scheduler: Scheduler<LoadTask>,
    detector: ProgressDetector,
    thumbnails: Option<ThumbnailService>,
    scanner: DurationScanner,
    resolve: ResolveJob,
    state: PersistedState,
    state_file: Option<PathBuf>,
    events: VecDeque<UiEvent>,
    chapters: Vec<f64>,
    pan: (f64, f64),
    dragging: bool,
    /// Paused from the keyboard, as opposed to the engine stopping on its own.
    user_paused: bool,
    sort_include_folders: bool,
    next_poll_at: Option<Instant>,
}

impl<E: MediaEngine> Player<E> {
    pub fn new(engine: E, state: PersistedState, collaborators: Collaborators) -> Self {
        let tuning = state.tuning;
        let core = PlayerCore::with_shuffle(ShuffleState::new(state.shuffle), state.repeat);
        let thumbnails = collaborators
            .thumbnailer
            .map(|generator| ThumbnailService::new(tuning.thumbnails, generator));

        let mut player = Self {
            core,
            gateway: EngineGateway::new(engine),
            sequencer: LoadSequencer::new(tuning.load),
            scheduler: Scheduler::new(),
            detector: ProgressDetector::new(tuning.eof),
            thumbnails,
            scanner: DurationScanner::new(collaborators.probe),
            resolve: ResolveJob::new(collaborators.resolver),
            state,
            state_file: None,
            events: VecDeque::new(),
            chapters: Vec::new(),
            pan: (0.0, 0.0),
            dragging: false,
            user_paused: false,
            sort_include_folders: false,
            next_poll_at: None,
        };
        player.apply_saved_settings(Instant::now());
        player
    }

    /// Persist settings to `path` whenever they change.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    fn apply_saved_settings(&mut self, now: Instant) {
        let quality = self.state.stream_quality;
        for (name, value, neutral) in self.setting_writes() {
            if !neutral {
                self.gateway
                    .set_property(name, value, WriteOptions::forced(), now);
            }
        }
        if quality != StreamQuality::Best {
            self.gateway.set_property(
                props::YTDL_FORMAT,
                quality.format_selector(),
                WriteOptions::forced(),
                now,
            );
        }
    }

    /// Every persisted engine setting as `(property, value, is_engine_default)`.
    fn setting_writes(&self) -> Vec<(&'static str, PropertyValue, bool)> {
        let video = self.state.video;
        let mut writes = vec![
            (
                props::VOLUME,
                PropertyValue::Number(f64::from(self.state.volume.min(100))),
                false,
            ),
            (props::MUTE, PropertyValue::Flag(self.state.muted), false),
        ];
        for (name, value) in [
            (props::VIDEO_ZOOM, self.state.window_zoom),
            (props::VIDEO_PAN_X, self.pan.0),
            (props::VIDEO_PAN_Y, self.pan.1),
            (props::BRIGHTNESS, f64::from(video.get(VideoAdjustment::Brightness))),
            (props::CONTRAST, f64::from(video.get(VideoAdjustment::Contrast))),
            (props::SATURATION, f64::from(video.get(VideoAdjustment::Saturation))),
            (props::GAMMA, f64::from(video.get(VideoAdjustment::Gamma))),
            (props::VIDEO_ROTATE, f64::from(video.rotation())),
        ] {
            writes.push((name, PropertyValue::Number(value), value == 0.0));
        }
        let aspect = self.state.aspect_ratio();
        writes.push((
            props::VIDEO_ASPECT,
            aspect_value(aspect),
            aspect == ASPECT_RATIOS[0],
        ));
        writes
    }

    /// Brings the engine back in line with the saved settings once a load has
    /// settled. Writes refused while the engine was busy land here.
    fn resync_settings(&mut self, now: Instant) {
        for (name, value, neutral) in self.setting_writes() {
            let current = self.gateway.get_property(name);
            if current.as_ref() == Some(&value) || (neutral && current.is_none()) {
                continue;
            }
            debug!(property = name, %value, "re-applying setting");
            self.gateway
                .set_property(name, value, WriteOptions::forced(), now);
        }
    }

    pub fn core(&self) -> &PlayerCore {
        &self.core
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn gateway(&self) -> &EngineGateway<E> {
        &self.gateway
    }

    pub fn engine_mut(&mut self) -> &mut E {
        self.gateway.engine_mut()
    }

    pub fn sequencer(&self) -> &LoadSequencer {
        &self.sequencer
    }

    pub fn chapters(&self) -> &[f64] {
        &self.chapters
    }

    pub fn tracks(&self, kind: TrackKind) -> Vec<TrackInfo> {
        self.gateway.engine().tracks(kind)
    }

    pub fn sort_include_folders(&self) -> bool {
        self.sort_include_folders
    }

    pub fn is_resolving(&self) -> bool {
        self.resolve.is_running()
    }

    pub fn is_playing(&self) -> bool {
        self.has_active_media() && !self.gateway.is_paused()
    }

    pub fn drain_events(&mut self) -> Vec<UiEvent> {
        self.events.drain(..).collect()
    }

    /// Earliest instant at which [`Player::tick`] has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.scheduler.next_due(), self.next_poll_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn emit(&mut self, event: UiEvent) {
        self.events.push_back(event);
    }

    fn status(&mut self, text: impl Into<String>) {
        self.emit(UiEvent::Status(text.into()));
    }

    fn has_active_media(&self) -> bool {
        self.gateway.path().is_some()
            && matches!(
                self.sequencer.phase(),
                LoadPhase::Issued | LoadPhase::AwaitingDimensions | LoadPhase::Playing
            )
    }

    fn persist(&self) {
        let Some(path) = &self.state_file else {
            return;
        };
        if let Err(err) = config::save_state_to(path, &self.state) {
            warn!("failed to save settings: {err:#}");
        }
    }

    /// Loads the selected item. Out-of-range selections are ignored.
    pub fn play_current(&mut self, now: Instant) {
        let Some(index) = self.core.current_index else {
            return;
        };
        let Some(media) = self.core.current_media().map(ToOwned::to_owned) else {
            return;
        };

        self.user_paused = false;
        self.detector.on_track_switch(now);
        self.detector
            .suspend_ui(now, self.sequencer.timings().ui_suspend());
        if let Some(thumbnails) = &mut self.thumbnails {
            thumbnails.clear_pending();
        }
        self.chapters.clear();
        self.core.shuffle.sync_to(Some(index));

        let saved = self.state.resume_position(&media);
        let resume = (saved > RESUME_MIN_SECS).then_some(saved);
        self.gateway
            .set_property(props::SPEED, 1.0, WriteOptions::forced(), now);

        let effects = self
            .sequencer
            .request(&mut self.gateway, &mut self.scheduler, &media, resume, now);
        self.apply_effects(effects, now);

        let title = format!(
            "[{}/{}] {}",
            index + 1,
            self.core.len(),
            playlist::display_name(&media)
        );
        self.emit(UiEvent::Title(title));
        if !self.dragging {
            self.emit(UiEvent::Timeline {
                position: 0.0,
                duration: 0.0,
            });
        }
        self.next_poll_at = Some(now);
    }

    fn apply_effects(&mut self, effects: Vec<LoadEffect>, now: Instant) {
        for effect in effects {
            match effect {
                LoadEffect::Deferred { until } => {
                    debug!(wait_ms = until.saturating_duration_since(now).as_millis() as u64, "load deferred");
                }
                LoadEffect::Issued { .. } => {}
                LoadEffect::Failed { media, error } => {
                    error!(media = %media, "playback failed: {error}");
                    self.status(format!("Cannot play {}", playlist::display_name(&media)));
                    self.emit(UiEvent::Transport { playing: false });
                }
                LoadEffect::Resize { width, height } => {
                    self.emit(UiEvent::Resize { width, height });
                }
                LoadEffect::Playing | LoadEffect::PlayingWithoutDimensions => {
                    self.emit(UiEvent::Transport { playing: true });
                }
                LoadEffect::Settled => self.resync_settings(now),
                LoadEffect::Resumed { position } => {
                    self.status(format!(
                        "Resumed from {}",
                        playlist::format_duration(Some(position))
                    ));
                }
                LoadEffect::ResumeSkipped => {}
                LoadEffect::ResumeAbandoned => self.status("Could not resume"),
                LoadEffect::Chapters(chapters) => {
                    self.chapters = chapters.clone();
                    self.emit(UiEvent::Chapters(chapters));
                }
                LoadEffect::RetryRequested => self.play_current(now),
            }
        }
    }

    /// One cooperative step of the UI loop.
    pub fn tick(&mut self, now: Instant) {
        while let Some(event) = self.gateway.engine_mut().poll_event() {
            self.on_engine_event(event, now);
        }

        for entry in self.scheduler.take_due(now) {
            let effects = self
                .sequencer
                .handle(&mut self.gateway, &mut self.scheduler, entry, now);
            self.apply_effects(effects, now);
        }

        self.collect_durations();
        self.collect_resolutions(now);
        if let Some(thumbnails) = &mut self.thumbnails
            && let Some(path) = thumbnails.poll(self.core.current_media())
        {
            self.events.push_back(UiEvent::Thumbnail(path));
        }

        if self.next_poll_at.is_none_or(|due| now >= due) {
            self.poll_progress(now);
            let interval = self.detector.poll_interval(self.gateway.is_paused());
            self.next_poll_at = Some(now + interval);
        }
    }

    fn on_engine_event(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::StartFile => self.detector.disarm_pending_advance(),
            EngineEvent::EndFile {
                reason: EndReason::Eof,
            } => {
                // A quality reload restarts the stream on purpose.
                if self.has_active_media() && !self.detector.is_suppressed(now) {
                    self.detector.arm_pending_advance();
                }
            }
            EngineEvent::EndFile { reason } => debug!(?reason, "engine ended media"),
        }
    }

    fn poll_progress(&mut self, now: Instant) {
        if !self.has_active_media() && !self.detector.has_pending_advance() {
            return;
        }
        let gate = PollGate {
            unsafe_window: self.gateway.in_unsafe_window(now),
            resize_pending: self.sequencer.resize_pending(),
        };
        if self.detector.should_skip(gate, now) {
            return;
        }

        let reading = ProgressReading {
            position: self.gateway.position(),
            duration: self.gateway.duration(),
            paused: self.gateway.is_paused(),
            user_paused: self.user_paused,
            path: self.gateway.path(),
        };
        if reading.position.is_some() {
            self.gateway.note_read(now);
        }
        let expected = self.core.current_media().map(ToOwned::to_owned);
        let Some(report) =
            self.detector
                .tick(gate, &reading, expected.as_deref(), self.dragging, now)
        else {
            return;
        };

        if let (Some(seconds), Some(media)) = (report.duration, expected.as_deref())
            && self.core.record_duration(media, seconds)
        {
            self.emit(UiEvent::PlaylistChanged);
        }
        if report.end_of_file {
            self.advance_after_end(now);
            return;
        }
        if let Some(timeline) = report.timeline {
            self.emit(UiEvent::Timeline {
                position: timeline.position,
                duration: timeline.duration,
            });
        }
    }

    fn advance_after_end(&mut self, now: Instant) {
        if let Some(media) = self.core.current_media().map(ToOwned::to_owned) {
            self.state.set_resume_position(&media, 0.0);
            self.persist();
        }
        match self.core.step(true) {
            Some(index) => {
                info!(index, "advancing to next item");
                self.play_current(now);
            }
            None => {
                info!("end of playlist");
                self.sequencer.supersede();
                if let Err(err) = self.gateway.stop() {
                    warn!("failed to stop engine: {err:#}");
                }
                self.emit(UiEvent::Transport { playing: false });
                self.emit(UiEvent::Idle);
            }
        }
    }

    fn collect_durations(&mut self) {
        let mut changed = false;
        for probed in self.scanner.poll() {
            changed |= self.core.record_duration(&probed.media, probed.seconds);
        }
        if changed {
            self.emit(UiEvent::PlaylistChanged);
        }
    }

    fn collect_resolutions(&mut self, now: Instant) {
        let Some(resolution) = self.resolve.poll() else {
            return;
        };
        let failures = resolution.failures();
        for (input, result) in resolution.inputs.iter().zip(&resolution.results) {
            if let Err(err) = result {
                warn!(url = %input, "url resolution failed: {err}");
            }
        }
        let resolved = resolution.resolved();
        if !resolved.is_empty() {
            self.append(resolved, false, now);
        }
        if failures > 0 {
            self.status(format!("Could not open {failures} url(s)"));
        }
    }

    /// Writes resume info for the current item: its position, or nothing
    /// when playback is close to the end.
    pub fn save_resume_info(&mut self) {
        let Some(media) = self.core.current_media().map(ToOwned::to_owned) else {
            return;
        };
        if self.gateway.path().as_deref() != Some(media.as_str()) {
            return;
        }
        let Some(position) = self.gateway.position() else {
            return;
        };
        let near_end = self
            .gateway
            .duration()
            .is_some_and(|duration| position > duration - RESUME_END_GUARD_SECS);
        let saved = if near_end { 0.0 } else { position };
        self.state.set_resume_position(&media, saved);
        self.persist();
    }

    pub fn next(&mut self, now: Instant) {
        self.manual_step(true, now);
    }

    pub fn previous(&mut self, now: Instant) {
        self.manual_step(false, now);
    }

    fn manual_step(&mut self, forward: bool, now: Instant) {
        self.save_resume_info();
        if self.core.step(forward).is_some() {
            self.play_current(now);
        }
    }

    pub fn play_index(&mut self, index: usize, now: Instant) {
        self.save_resume_info();
        if self.core.select(index) {
            self.play_current(now);
        }
    }

    /// Starts playback when idle, otherwise flips pause.
    pub fn toggle_pause(&mut self, now: Instant) {
        if !self.has_active_media() {
            if self.core.current_index.is_none() && !self.core.is_empty() {
                self.core.select(0);
            }
            self.play_current(now);
            return;
        }
        let paused = self.gateway.is_paused();
        if self
            .gateway
            .set_property(props::PAUSE, !paused, WriteOptions::default(), now)
        {
            self.user_paused = !paused;
            if !paused {
                self.save_resume_info();
            }
            self.emit(UiEvent::Transport { playing: paused });
        }
    }

    pub fn stop(&mut self, now: Instant) {
        self.save_resume_info();
        self.user_paused = true;
        self.sequencer.supersede();
        self.detector.disarm_pending_advance();
        if let Err(err) = self.gateway.stop() {
            warn!("failed to stop engine: {err:#}");
        }
        self.gateway
            .set_property(props::PAUSE, true, WriteOptions::forced(), now);
        self.emit(UiEvent::Transport { playing: false });
        self.emit(UiEvent::Timeline {
            position: 0.0,
            duration: 0.0,
        });
        self.emit(UiEvent::Idle);
    }

    pub fn seek_relative(&mut self, delta: f64, now: Instant) {
        let Some(position) = self.gateway.position() else {
            return;
        };
        self.seek_to(position + delta, now);
    }

    pub fn seek_to(&mut self, seconds: f64, now: Instant) {
        let mut target = seconds.max(0.0);
        let duration = self.gateway.duration();
        if let Some(duration) = duration {
            target = target.min(duration);
        }
        match self.gateway.seek(target, false, now) {
            Ok(()) => {
                self.status(format!(
                    "{} / {}",
                    playlist::format_duration(Some(target)),
                    playlist::format_duration(duration)
                ));
            }
            Err(err) => debug!("seek refused: {err:#}"),
        }
    }

    pub fn set_dragging(&mut self, dragging: bool) {
        self.dragging = dragging;
    }

    /// Steps playback speed from the step closest to the current speed.
    pub fn change_speed_step(&mut self, direction: i32, now: Instant) {
        let current = self.gateway.get_f64(props::SPEED).unwrap_or(1.0);
        let closest = SPEED_STEPS
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - current).abs().total_cmp(&(*b - current).abs()))
            .map_or(2, |(idx, _)| idx);
        let target = closest
            .saturating_add_signed(direction as isize)
            .min(SPEED_STEPS.len() - 1);
        let speed = SPEED_STEPS[target];
        if self
            .gateway
            .set_property(props::SPEED, speed, WriteOptions::default(), now)
        {
            self.status(format!("{speed}x"));
        }
    }

    pub fn adjust_volume(&mut self, delta: i32, now: Instant) {
        let volume = (i32::from(self.state.volume) + delta).clamp(0, 100) as u8;
        self.set_volume(volume, now);
    }

    pub fn set_volume(&mut self, volume: u8, now: Instant) {
        let volume = volume.min(100);
        self.state.volume = volume;
        self.gateway.set_property(
            props::VOLUME,
            f64::from(volume),
            WriteOptions::default(),
            now,
        );
        self.persist();
        self.status(format!("Volume {volume}%"));
    }

    pub fn toggle_mute(&mut self, now: Instant) {
        let muted = !self.state.muted;
        self.state.muted = muted;
        self.gateway
            .set_property(props::MUTE, muted, WriteOptions::default(), now);
        self.persist();
        self.status(if muted { "Muted" } else { "Unmuted" });
    }

    pub fn toggle_shuffle(&mut self) {
        let enabled = !self.core.shuffle.enabled;
        self.core.set_shuffle(enabled);
        self.state.shuffle = enabled;
        self.persist();
        self.status(if enabled { "Shuffle On" } else { "Shuffle Off" });
    }

    pub fn cycle_repeat(&mut self) {
        let mode = self.core.cycle_repeat();
        self.state.repeat = mode;
        self.persist();
        self.status(mode.label());
    }

    pub fn zoom(&mut self, delta: f64, now: Instant) {
        let zoom = (self.state.window_zoom + delta).clamp(-ZOOM_LIMIT, ZOOM_LIMIT);
        if self.gateway.set_property(
            props::VIDEO_ZOOM,
            zoom,
            WriteOptions::throttled(VIEW_WRITE_INTERVAL),
            now,
        ) {
            self.state.window_zoom = zoom;
            self.persist();
            self.status(format!("Zoom {zoom:+.1}"));
        }
    }

    pub fn pan(&mut self, dx: f64, dy: f64, now: Instant) {
        let x = (self.pan.0 + dx).clamp(-PAN_LIMIT, PAN_LIMIT);
        let y = (self.pan.1 + dy).clamp(-PAN_LIMIT, PAN_LIMIT);
        let options = WriteOptions::throttled(VIEW_WRITE_INTERVAL);
        if dx != 0.0 && self.gateway.set_property(props::VIDEO_PAN_X, x, options, now) {
            self.pan.0 = x;
        }
        if dy != 0.0 && self.gateway.set_property(props::VIDEO_PAN_Y, y, options, now) {
            self.pan.1 = y;
        }
    }

    pub fn reset_view(&mut self, now: Instant) {
        self.pan = (0.0, 0.0);
        self.state.window_zoom = 0.0;
        for name in [props::VIDEO_ZOOM, props::VIDEO_PAN_X, props::VIDEO_PAN_Y] {
            self.gateway
                .set_property(name, 0.0, WriteOptions::default(), now);
        }
        self.persist();
    }

    pub fn adjust_video(&mut self, adjustment: VideoAdjustment, delta: i32, now: Instant) {
        let value = (self.state.video.get(adjustment) + delta)
            .clamp(-ADJUSTMENT_LIMIT, ADJUSTMENT_LIMIT);
        self.state.video.set(adjustment, value);
        self.gateway.set_property(
            adjustment_property(adjustment),
            f64::from(value),
            WriteOptions::default(),
            now,
        );
        self.persist();
        self.status(format!("{}: {value}", adjustment.label()));
    }

    /// Quarter turn clockwise.
    pub fn rotate_video(&mut self, now: Instant) {
        let degrees = (self.state.video.rotation() + 90) % 360;
        self.state.video.rotate = degrees;
        self.gateway.set_property(
            props::VIDEO_ROTATE,
            f64::from(degrees),
            WriteOptions::forced(),
            now,
        );
        self.persist();
        self.status(format!("Rotate: {degrees}\u{b0}"));
    }

    /// Overrides the display aspect; `auto` keeps the source aspect.
    pub fn set_aspect_ratio(&mut self, ratio: &str, now: Instant) -> bool {
        let wanted = ratio.trim();
        let Some(ratio) = ASPECT_RATIOS
            .iter()
            .copied()
            .find(|known| known.eq_ignore_ascii_case(wanted))
        else {
            self.status(format!("Unknown aspect ratio {wanted}"));
            return false;
        };
        self.state.aspect_ratio = ratio.to_string();
        self.gateway.set_property(
            props::VIDEO_ASPECT,
            aspect_value(ratio),
            WriteOptions::forced(),
            now,
        );
        self.persist();
        self.status(format!("Aspect: {ratio}"));
        true
    }

    pub fn cycle_aspect_ratio(&mut self, now: Instant) {
        let current = ASPECT_RATIOS
            .iter()
            .position(|ratio| *ratio == self.state.aspect_ratio())
            .unwrap_or(0);
        let next = ASPECT_RATIOS[(current + 1) % ASPECT_RATIOS.len()];
        self.set_aspect_ratio(next, now);
    }

    /// Switches to track `id` of `kind`. `None` turns subtitles off.
    pub fn select_track(&mut self, kind: TrackKind, id: Option<i64>, now: Instant) -> bool {
        let (property, label) = match kind {
            TrackKind::Audio => (props::AUDIO_TRACK, "Audio"),
            TrackKind::Subtitle => (props::SUBTITLE_TRACK, "Subtitles"),
        };
        let track = match id {
            Some(id) => {
                let Some(track) = self.tracks(kind).into_iter().find(|track| track.id == id) else {
                    self.status(format!("No {} track #{id}", label.to_lowercase()));
                    return false;
                };
                Some(track)
            }
            None if kind == TrackKind::Subtitle => None,
            None => {
                self.status("Audio track needs an id");
                return false;
            }
        };

        let value = track
            .as_ref()
            .map_or_else(|| PropertyValue::from("no"), |track| PropertyValue::Number(track.id as f64));
        if !self
            .gateway
            .set_property(property, value, WriteOptions::default(), now)
        {
            self.status("Track switch refused, try again");
            return false;
        }
        self.status(match &track {
            Some(track) => format!("{label}: {}", track.label()),
            None => format!("{label} off"),
        });
        true
    }

    /// Changes stream quality and reloads the current stream in place.
    pub fn set_quality(&mut self, quality: StreamQuality, now: Instant) {
        self.state.stream_quality = quality;
        self.persist();
        if !self.gateway.set_property(
            props::YTDL_FORMAT,
            quality.format_selector(),
            WriteOptions::forced(),
            now,
        ) {
            self.status("Quality change failed");
            return;
        }
        self.status(format!("Quality: {}", quality.label()));

        let Some(media) = self.core.current_media().map(ToOwned::to_owned) else {
            return;
        };
        if !config::is_stream_reference(&media) || !self.has_active_media() {
            return;
        }
        self.detector.suppress_for_reload(now);
        self.save_resume_info();
        self.play_current(now);
    }

    /// Adds media, dropping duplicates. With `play_new` the first added item
    /// starts; otherwise playback starts only if nothing is playing.
    pub fn append(&mut self, items: Vec<String>, play_new: bool, now: Instant) -> usize {
        let was_idle = !self.has_active_media();
        let added = self.core.append(items);
        if added.is_empty() {
            self.status("Already in playlist");
            return 0;
        }
        self.emit(UiEvent::PlaylistChanged);
        self.scanner.start(self.core.unknown_durations());

        let first_added = self.core.position_of(&added[0]);
        if play_new && let Some(index) = first_added {
            self.play_index(index, now);
        } else if was_idle {
            self.play_current(now);
        }
        self.status(format!("Added {} item(s)", added.len()));
        added.len()
    }

    /// Expands command-line style inputs: local files and folders are added
    /// directly, direct media URLs as-is, other URLs go through resolution.
    pub fn add_inputs(&mut self, inputs: &[String], recursive: bool, now: Instant) {
        let mut local = Vec::new();
        let mut direct = Vec::new();
        let mut to_resolve = Vec::new();
        for input in inputs {
            if !config::is_stream_reference(input) {
                local.push(PathBuf::from(input));
            } else if is_direct_media_url(input) {
                direct.push(input.clone());
            } else {
                to_resolve.push(input.clone());
            }
        }

        let mut items = playlist::collect_paths(&local, recursive);
        items.extend(direct);
        if !items.is_empty() {
            self.append(items, false, now);
        } else if !local.is_empty() && to_resolve.is_empty() {
            self.status("No media found");
        }
        if !to_resolve.is_empty() {
            let options = ResolveOptions::new(self.state.stream_quality, &self.state.stream_auth);
            self.resolve.start(to_resolve, options);
            self.status("Resolving...");
        }
    }

    pub fn remove_indices(&mut self, indices: &[usize], now: Instant) {
        let outcome = self.core.remove_indices(indices);
        match outcome {
            Removal::Nothing => return,
            Removal::Emptied => self.stop(now),
            Removal::CurrentKept => {}
            Removal::CurrentRemoved(Some(_)) => {
                self.sequencer.supersede();
                self.play_current(now);
            }
            Removal::CurrentRemoved(None) => self.stop(now),
        }
        self.emit(UiEvent::PlaylistChanged);
    }

    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        let moved = self.core.reorder(from, to);
        if moved {
            self.core.set_shuffle(self.core.shuffle.enabled);
            self.emit(UiEvent::PlaylistChanged);
        }
        moved
    }

    pub fn toggle_sort_include_folders(&mut self) {
        self.sort_include_folders = !self.sort_include_folders;
        self.status(if self.sort_include_folders {
            "Sort including folders"
        } else {
            "Sort excluding folders"
        });
    }

    pub fn sort(&mut self, key: SortKey, reverse: bool) {
        self.core.sort(key, reverse, self.sort_include_folders);
        self.core.set_shuffle(self.core.shuffle.enabled);
        let key_name = match key {
            SortKey::Name if self.sort_include_folders => "Path",
            SortKey::Name => "Name",
            SortKey::Duration => "Duration",
        };
        let direction = if reverse { "descending" } else { "ascending" };
        self.status(format!("Sorted: {key_name} {direction}"));
        self.emit(UiEvent::PlaylistChanged);
    }

    pub fn save_playlist(&mut self, path: &Path) -> Result<PathBuf> {
        let written = playlist::save_m3u(path, &self.core.playlist, |item| {
            self.core.duration_of(item)
        })?;
        info!(path = %written.display(), "playlist saved");
        self.status("Playlist saved");
        Ok(written)
    }

    /// Replaces the playlist with an M3U's entries and plays the first one.
    pub fn load_playlist(&mut self, path: &Path, now: Instant) -> Result<usize> {
        let items = playlist::load_m3u(path)?;
        if items.is_empty() {
            self.status("No valid files in playlist");
            return Ok(0);
        }
        self.save_resume_info();
        self.core.replace(items);
        let count = self.core.len();
        self.emit(UiEvent::PlaylistChanged);
        self.play_current(now);
        self.scanner.start(self.core.unknown_durations());
        self.status(format!("Loaded {count} items"));
        Ok(count)
    }

    /// Preview frame for `seconds` into the current item, if one is cached.
    pub fn request_thumbnail(&mut self, seconds: f64, now: Instant) -> Option<PathBuf> {
        let media = self.core.current_media()?.to_owned();
        self.thumbnails.as_mut()?.request(&media, seconds, now)
    }

    pub fn shutdown(&mut self) {
        self.save_resume_info();
        self.scanner.cancel();
        self.sequencer.supersede();
        if let Err(err) = self.gateway.stop() {
            warn!("failed to stop engine during shutdown: {err:#}");
        }
        self.gateway.shutdown();
        self.persist();
        info!("player shut down");
    }
}

fn adjustment_property(adjustment: VideoAdjustment) -> &'static str {
    match adjustment {
        VideoAdjustment::Brightness => props::BRIGHTNESS,
        VideoAdjustment::Contrast => props::CONTRAST,
        VideoAdjustment::Saturation => props::SATURATION,
        VideoAdjustment::Gamma => props::GAMMA,
    }
}

fn aspect_value(ratio: &str) -> PropertyValue {
    if ratio == ASPECT_RATIOS[0] {
        PropertyValue::from("-1")
    } else {
        PropertyValue::from(ratio)
    }
}
