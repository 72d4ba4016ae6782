//! Load sequencing for the active media source.
//!
//! Each load attempt gets a fresh token. Every deferred step of an attempt
//! (dimension probes, resume seek, chapter refresh, settle timer) carries the
//! token it was scheduled under and does nothing once a newer token exists.

use crate::config;
use crate::engine::{MediaEngine, props};
use crate::gateway::{EngineGateway, WriteOptions};
use crate::playlist;
use crate::scheduler::{Scheduled, Scheduler};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTimings {
    /// Minimum gap between two load commands.
    pub cooldown_ms: u64,
    /// Window after a load in which reads are unreliable and writes refused.
    pub unsafe_read_ms: u64,
    /// The busy flag clears after this long even if nothing else settles it.
    pub settle_ms: u64,
    /// UI polling is suspended this long after every load.
    pub ui_suspend_ms: u64,
    pub probe_interval_ms: u64,
    pub probe_attempts_local: u32,
    pub probe_attempts_stream: u32,
    pub kickstart_interval_ms: u64,
    pub kickstart_attempts: u32,
    pub kickstart_pause_ms: u64,
    pub resume_delay_ms: u64,
    pub resume_retry_ms: u64,
    pub resume_attempts: u32,
    pub chapter_delay_ms: u64,
    pub load_retry_ms: u64,
    pub load_attempts: u32,
}

impl Default for LoadTimings {
    fn default() -> Self {
        Self {
            cooldown_ms: 250,
            unsafe_read_ms: 350,
            settle_ms: 450,
            ui_suspend_ms: 300,
            probe_interval_ms: 90,
            probe_attempts_local: 25,
            probe_attempts_stream: 90,
            kickstart_interval_ms: 250,
            kickstart_attempts: 40,
            kickstart_pause_ms: 60,
            resume_delay_ms: 150,
            resume_retry_ms: 200,
            resume_attempts: 5,
            chapter_delay_ms: 700,
            load_retry_ms: 300,
            load_attempts: 3,
        }
    }
}

impl LoadTimings {
    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    pub fn ui_suspend(&self) -> Duration {
        Self::ms(self.ui_suspend_ms)
    }

    fn probe_budget(&self, is_stream: bool) -> u32 {
        if is_stream {
            self.probe_attempts_stream
        } else {
            self.probe_attempts_local
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    /// Waiting for the inter-load cooldown.
    Requested,
    Issued,
    AwaitingDimensions,
    Playing,
    /// Stopped explicitly; everything still in flight is stale.
    Superseded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadTask {
    /// Cooldown expired; replay whatever is current now.
    Retry,
    ReissueLoad { attempt: u32 },
    ProbeDimensions { attempt: u32 },
    Kickstart { attempt: u32 },
    KickstartUnpause,
    ClearBusy,
    ResumeSeek { position: f64, attempt: u32 },
    RefreshChapters,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadEffect {
    Deferred { until: Instant },
    Issued { token: u64, media: String },
    Failed { media: String, error: String },
    Resize { width: u32, height: u32 },
    Playing,
    PlayingWithoutDimensions,
    Settled,
    Resumed { position: f64 },
    /// The saved position is too close to the end to be worth restoring.
    ResumeSkipped,
    /// Every resume seek failed.
    ResumeAbandoned,
    Chapters(Vec<f64>),
    RetryRequested,
}

#[derive(Debug)]
pub struct LoadSequencer {
    timings: LoadTimings,
    token: u64,
    phase: LoadPhase,
    media: Option<String>,
    is_stream: bool,
    expects_video: bool,
    resume: Option<f64>,
    dimensions: Option<(u32, u32)>,
    last_load_attempt_at: Option<Instant>,
    next_loadfile_allowed_at: Option<Instant>,
    retry_pending: bool,
}

impl LoadSequencer {
    pub fn new(timings: LoadTimings) -> Self {
        Self {
            timings,
            token: 0,
            phase: LoadPhase::Idle,
            media: None,
            is_stream: false,
            expects_video: true,
            resume: None,
            dimensions: None,
            last_load_attempt_at: None,
            next_loadfile_allowed_at: None,
            retry_pending: false,
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn media(&self) -> Option<&str> {
        self.media.as_deref()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    pub fn timings(&self) -> &LoadTimings {
        &self.timings
    }

    pub fn last_load_attempt_at(&self) -> Option<Instant> {
        self.last_load_attempt_at
    }

    /// True while the first-frame dimension probe is still unresolved.
    pub fn resize_pending(&self) -> bool {
        matches!(self.phase, LoadPhase::Issued | LoadPhase::AwaitingDimensions)
    }

    pub fn is_token_current(&self, token: u64) -> bool {
        token == self.token
    }

    /// Starts loading `media`, or defers until the cooldown has passed.
    pub fn request<E: MediaEngine>(
        &mut self,
        gateway: &mut EngineGateway<E>,
        scheduler: &mut Scheduler<LoadTask>,
        media: &str,
        resume: Option<f64>,
        now: Instant,
    ) -> Vec<LoadEffect> {
        if let Some(allowed) = self.next_loadfile_allowed_at.filter(|allowed| now < *allowed) {
            let retry_scheduled = self.retry_pending;
            // The earlier attempt is stale as soon as a newer one is wanted.
            self.supersede();
            self.phase = LoadPhase::Requested;
            self.retry_pending = true;
            if !retry_scheduled {
                scheduler.schedule(allowed, self.token, LoadTask::Retry);
            }
            debug!(media, "load deferred by cooldown");
            return vec![LoadEffect::Deferred { until: allowed }];
        }

        self.media = Some(media.to_string());
        self.is_stream = config::is_stream_reference(media);
        self.expects_video = self.is_stream || !playlist::is_audio_file(Path::new(media));
        self.resume = resume;
        self.issue(gateway, scheduler, 0, now)
    }

    /// Invalidates every callback of the current attempt.
    pub fn supersede(&mut self) {
        self.token += 1;
        self.phase = LoadPhase::Superseded;
        self.retry_pending = false;
        self.dimensions = None;
    }

    fn issue<E: MediaEngine>(
        &mut self,
        gateway: &mut EngineGateway<E>,
        scheduler: &mut Scheduler<LoadTask>,
        attempt: u32,
        now: Instant,
    ) -> Vec<LoadEffect> {
        let Some(media) = self.media.clone() else {
            return Vec::new();
        };
        let timings = self.timings;

        self.token += 1;
        self.phase = LoadPhase::Issued;
        self.retry_pending = false;
        self.dimensions = None;
        self.last_load_attempt_at = Some(now);
        self.next_loadfile_allowed_at = Some(now + LoadTimings::ms(timings.cooldown_ms));
        gateway.begin_load(now, LoadTimings::ms(timings.unsafe_read_ms));
        let token = self.token;

        if let Err(err) = gateway.load(&media, true) {
            if attempt + 1 < timings.load_attempts {
                warn!(media = %media, attempt, "load command failed, retrying: {err:#}");
                scheduler.schedule(
                    now + LoadTimings::ms(timings.load_retry_ms),
                    token,
                    LoadTask::ReissueLoad {
                        attempt: attempt + 1,
                    },
                );
                return Vec::new();
            }
            warn!(media = %media, "giving up on load: {err:#}");
            self.phase = LoadPhase::Failed;
            gateway.clear_busy();
            return vec![LoadEffect::Failed {
                media,
                error: format!("{err:#}"),
            }];
        }

        info!(media = %media, token, stream = self.is_stream, "load issued");
        let mut effects = vec![LoadEffect::Issued {
            token,
            media: media.clone(),
        }];
        if self.expects_video {
            self.phase = LoadPhase::AwaitingDimensions;
            scheduler.schedule(
                now + LoadTimings::ms(timings.probe_interval_ms),
                token,
                LoadTask::ProbeDimensions { attempt: 0 },
            );
        } else {
            // Nothing to measure for audio; start right away.
            self.phase = LoadPhase::Playing;
            gateway.set_property(props::PAUSE, false, WriteOptions::forced(), now);
            effects.push(LoadEffect::Playing);
        }
        scheduler.schedule(
            now + LoadTimings::ms(timings.settle_ms),
            token,
            LoadTask::ClearBusy,
        );
        if let Some(position) = self.resume {
            scheduler.schedule(
                now + LoadTimings::ms(timings.resume_delay_ms),
                token,
                LoadTask::ResumeSeek {
                    position,
                    attempt: 0,
                },
            );
        }
        scheduler.schedule(
            now + LoadTimings::ms(timings.chapter_delay_ms),
            token,
            LoadTask::RefreshChapters,
        );
        effects
    }

    /// Runs one deferred step. Stale steps return no effects and touch nothing.
    pub fn handle<E: MediaEngine>(
        &mut self,
        gateway: &mut EngineGateway<E>,
        scheduler: &mut Scheduler<LoadTask>,
        entry: Scheduled<LoadTask>,
        now: Instant,
    ) -> Vec<LoadEffect> {
        if entry.task == LoadTask::Retry {
            if !self.retry_pending {
                return Vec::new();
            }
            self.retry_pending = false;
            return vec![LoadEffect::RetryRequested];
        }
        if !self.is_token_current(entry.token) {
            return Vec::new();
        }

        let timings = self.timings;
        let token = self.token;
        match entry.task {
            LoadTask::Retry => Vec::new(),
            LoadTask::ReissueLoad { attempt } => {
                if self.phase != LoadPhase::Issued {
                    return Vec::new();
                }
                self.issue(gateway, scheduler, attempt, now)
            }
            LoadTask::ProbeDimensions { attempt } => {
                if self.phase != LoadPhase::AwaitingDimensions {
                    return Vec::new();
                }
                if let Some((width, height)) = gateway.video_dimensions() {
                    self.dimensions = Some((width, height));
                    self.phase = LoadPhase::Playing;
                    gateway.set_property(props::PAUSE, false, WriteOptions::forced(), now);
                    return vec![LoadEffect::Resize { width, height }, LoadEffect::Playing];
                }
                if attempt + 1 < timings.probe_budget(self.is_stream) {
                    scheduler.schedule(
                        now + LoadTimings::ms(timings.probe_interval_ms),
                        token,
                        LoadTask::ProbeDimensions {
                            attempt: attempt + 1,
                        },
                    );
                    return Vec::new();
                }

                debug!(token, "no dimensions yet, starting playback anyway");
                self.phase = LoadPhase::Playing;
                gateway.set_property(props::PAUSE, false, WriteOptions::forced(), now);
                scheduler.schedule(
                    now + LoadTimings::ms(timings.kickstart_interval_ms),
                    token,
                    LoadTask::Kickstart { attempt: 0 },
                );
                vec![LoadEffect::PlayingWithoutDimensions]
            }
            LoadTask::Kickstart { attempt } => {
                if self.phase != LoadPhase::Playing || self.dimensions.is_some() {
                    return Vec::new();
                }
                if let Some((width, height)) = gateway.video_dimensions() {
                    self.dimensions = Some((width, height));
                    gateway.set_property(props::PAUSE, true, WriteOptions::forced(), now);
                    scheduler.schedule(
                        now + LoadTimings::ms(timings.kickstart_pause_ms),
                        token,
                        LoadTask::KickstartUnpause,
                    );
                    return vec![LoadEffect::Resize { width, height }];
                }
                if attempt + 1 < timings.kickstart_attempts {
                    scheduler.schedule(
                        now + LoadTimings::ms(timings.kickstart_interval_ms),
                        token,
                        LoadTask::Kickstart {
                            attempt: attempt + 1,
                        },
                    );
                }
                Vec::new()
            }
            LoadTask::KickstartUnpause => {
                gateway.set_property(props::PAUSE, false, WriteOptions::forced(), now);
                Vec::new()
            }
            LoadTask::ClearBusy => {
                gateway.clear_busy();
                vec![LoadEffect::Settled]
            }
            LoadTask::ResumeSeek { position, attempt } => {
                self.resume_seek(gateway, scheduler, position, attempt, now)
            }
            LoadTask::RefreshChapters => vec![LoadEffect::Chapters(gateway.engine().chapters())],
        }
    }

    fn resume_seek<E: MediaEngine>(
        &mut self,
        gateway: &mut EngineGateway<E>,
        scheduler: &mut Scheduler<LoadTask>,
        position: f64,
        attempt: u32,
        now: Instant,
    ) -> Vec<LoadEffect> {
        let timings = self.timings;
        let outcome = match gateway.duration() {
            Some(duration) if position >= duration - 10.0 => {
                debug!(position, duration, "saved position too close to the end");
                return vec![LoadEffect::ResumeSkipped];
            }
            Some(_) => gateway.seek(position, true, now),
            None => Err(anyhow::anyhow!("duration not known yet")),
        };

        match outcome {
            Ok(()) => vec![LoadEffect::Resumed { position }],
            Err(err) if attempt + 1 < timings.resume_attempts => {
                debug!(position, attempt, "resume seek failed, retrying: {err:#}");
                scheduler.schedule(
                    now + LoadTimings::ms(timings.resume_retry_ms),
                    self.token,
                    LoadTask::ResumeSeek {
                        position,
                        attempt: attempt + 1,
                    },
                );
                Vec::new()
            }
            Err(err) => {
                debug!(position, "abandoning resume: {err:#}");
                vec![LoadEffect::ResumeAbandoned]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedEngine;

    struct Rig {
        seq: LoadSequencer,
        gw: EngineGateway<ScriptedEngine>,
        sched: Scheduler<LoadTask>,
        t0: Instant,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                seq: LoadSequencer::new(LoadTimings::default()),
                gw: EngineGateway::new(ScriptedEngine::new()),
                sched: Scheduler::new(),
                t0: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        /// Steps a 10ms clock over `from..=to`, returning `(token, effect)` pairs.
        fn run(&mut self, from: u64, to: u64) -> Vec<(u64, LoadEffect)> {
            let mut out = Vec::new();
            let mut ms = from;
            while ms <= to {
                let now = self.at(ms);
                for entry in self.sched.take_due(now) {
                    let token = entry.token;
                    for effect in self.seq.handle(&mut self.gw, &mut self.sched, entry, now) {
                        out.push((token, effect));
                    }
                }
                ms += 10;
            }
            out
        }
    }

    #[test]
    fn load_starts_paused_and_unpauses_once_dimensions_arrive() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        let effects = rig.seq.request(&mut rig.gw, &mut rig.sched, "a.mkv", None, now);
        assert_eq!(
            effects,
            vec![LoadEffect::Issued {
                token: 1,
                media: String::from("a.mkv")
            }]
        );
        assert_eq!(rig.gw.engine().loads, vec![(String::from("a.mkv"), true)]);
        assert!(rig.gw.is_busy());

        rig.run(0, 200);
        assert_eq!(rig.seq.phase(), LoadPhase::AwaitingDimensions);

        rig.gw.engine_mut().dimensions = Some((1920, 1080));
        let effects: Vec<_> = rig.run(210, 400).into_iter().map(|(_, e)| e).collect();
        assert!(effects.contains(&LoadEffect::Resize {
            width: 1920,
            height: 1080
        }));
        assert_eq!(rig.seq.phase(), LoadPhase::Playing);
        assert!(!rig.gw.engine().is_paused());
    }

    #[test]
    fn busy_clears_on_settle_timer_even_without_dimensions() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        rig.seq.request(&mut rig.gw, &mut rig.sched, "a.mkv", None, now);
        let effects: Vec<_> = rig.run(0, 500).into_iter().map(|(_, e)| e).collect();
        assert!(effects.contains(&LoadEffect::Settled));
        assert!(!rig.gw.is_busy());
        assert!(rig.seq.resize_pending());
    }

    #[test]
    fn rapid_requests_are_deferred_by_cooldown() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        rig.seq.request(&mut rig.gw, &mut rig.sched, "a.mkv", None, now);
        let now = rig.at(100);
        let effects = rig.seq.request(&mut rig.gw, &mut rig.sched, "b.mkv", None, now);
        assert_eq!(effects, vec![LoadEffect::Deferred { until: rig.at(250) }]);
        assert_eq!(rig.seq.phase(), LoadPhase::Requested);

        let now = rig.at(120);
        rig.seq.request(&mut rig.gw, &mut rig.sched, "c.mkv", None, now);
        let retries = rig
            .run(100, 260)
            .into_iter()
            .filter(|(_, e)| *e == LoadEffect::RetryRequested)
            .count();
        assert_eq!(retries, 1);
        assert_eq!(rig.gw.engine().loads.len(), 1);
    }

    #[test]
    fn newer_load_silences_every_callback_of_the_old_one() {
        let mut rig = Rig::new();
        rig.gw.engine_mut().chapter_marks = vec![10.0, 20.0];
        let now = rig.at(0);
        rig.seq
            .request(&mut rig.gw, &mut rig.sched, "a.mkv", Some(42.0), now);
        let stale_token = rig.seq.token();

        let now = rig.at(300);
        rig.seq.request(&mut rig.gw, &mut rig.sched, "b.mkv", None, now);
        assert_ne!(rig.seq.token(), stale_token);
        rig.gw.engine_mut().set_duration(Some(600.0));
        rig.gw.engine_mut().dimensions = Some((640, 480));

        let effects = rig.run(0, 3000);
        assert!(effects.iter().all(|(token, _)| *token != stale_token));
        assert!(rig.gw.engine().seeks.is_empty());
        assert!(effects.iter().any(|(_, e)| matches!(e, LoadEffect::Resize { .. })));
    }

    #[test]
    fn request_deferred_by_cooldown_still_silences_the_old_load() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        rig.seq
            .request(&mut rig.gw, &mut rig.sched, "a.mkv", Some(42.0), now);
        let stale_token = rig.seq.token();
        rig.gw.engine_mut().set_duration(Some(600.0));

        let now = rig.at(100);
        let effects = rig.seq.request(&mut rig.gw, &mut rig.sched, "b.mkv", None, now);
        assert_eq!(effects, vec![LoadEffect::Deferred { until: rig.at(250) }]);
        assert_ne!(rig.seq.token(), stale_token);

        let effects = rig.run(100, 240);
        assert!(effects.iter().all(|(token, _)| *token != stale_token));
        assert!(rig.gw.engine().seeks.is_empty());
        assert!(rig.gw.engine().writes_to(props::PAUSE).is_empty());

        let effects = rig.run(250, 260);
        assert_eq!(
            effects.iter().map(|(_, e)| e.clone()).collect::<Vec<_>>(),
            vec![LoadEffect::RetryRequested]
        );
    }

    #[test]
    fn exhausted_dimension_checks_play_then_kickstart_fixes_size() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        rig.seq.request(&mut rig.gw, &mut rig.sched, "a.mkv", None, now);

        let effects: Vec<_> = rig.run(0, 2600).into_iter().map(|(_, e)| e).collect();
        assert!(effects.contains(&LoadEffect::PlayingWithoutDimensions));
        assert!(!rig.gw.engine().is_paused());

        rig.gw.engine_mut().dimensions = Some((1280, 720));
        let effects: Vec<_> = rig.run(2610, 3200).into_iter().map(|(_, e)| e).collect();
        assert_eq!(
            effects,
            vec![LoadEffect::Resize {
                width: 1280,
                height: 720
            }]
        );
        let pauses: Vec<Option<bool>> = rig
            .gw
            .engine()
            .writes_to(props::PAUSE)
            .into_iter()
            .map(|value| value.as_bool())
            .collect();
        assert_eq!(pauses, vec![Some(false), Some(true), Some(false)]);
        assert_eq!(rig.seq.dimensions(), Some((1280, 720)));
    }

    #[test]
    fn streams_get_a_longer_dimension_budget() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        rig.seq.request(
            &mut rig.gw,
            &mut rig.sched,
            "https://example.com/live",
            None,
            now,
        );
        let effects: Vec<_> = rig.run(0, 2600).into_iter().map(|(_, e)| e).collect();
        assert!(!effects.contains(&LoadEffect::PlayingWithoutDimensions));
        assert_eq!(rig.seq.phase(), LoadPhase::AwaitingDimensions);
    }

    #[test]
    fn resume_seek_retries_until_engine_accepts() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        rig.seq
            .request(&mut rig.gw, &mut rig.sched, "a.mkv", Some(90.0), now);
        rig.gw.engine_mut().set_duration(Some(600.0));
        rig.gw.engine_mut().failing_seeks = 2;

        let effects: Vec<_> = rig.run(0, 1500).into_iter().map(|(_, e)| e).collect();
        assert!(effects.contains(&LoadEffect::Resumed { position: 90.0 }));
        assert_eq!(rig.gw.engine().seeks, vec![90.0, 90.0, 90.0]);
    }

    #[test]
    fn resume_is_skipped_near_the_end_and_abandoned_after_retries() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        rig.seq
            .request(&mut rig.gw, &mut rig.sched, "a.mkv", Some(595.0), now);
        rig.gw.engine_mut().set_duration(Some(600.0));
        let effects: Vec<_> = rig.run(0, 1000).into_iter().map(|(_, e)| e).collect();
        assert!(effects.contains(&LoadEffect::ResumeSkipped));
        assert!(rig.gw.engine().seeks.is_empty());

        let mut rig = Rig::new();
        let now = rig.at(0);
        rig.seq
            .request(&mut rig.gw, &mut rig.sched, "b.mkv", Some(30.0), now);
        let effects: Vec<_> = rig.run(0, 3000).into_iter().map(|(_, e)| e).collect();
        assert!(effects.contains(&LoadEffect::ResumeAbandoned));
    }

    #[test]
    fn failing_load_is_retried_then_reported() {
        let mut rig = Rig::new();
        rig.gw.engine_mut().fail_loads = true;
        let now = rig.at(0);
        let first = rig.seq.request(&mut rig.gw, &mut rig.sched, "bad.mkv", None, now);
        assert!(first.is_empty());

        let effects: Vec<_> = rig.run(0, 1500).into_iter().map(|(_, e)| e).collect();
        assert!(matches!(effects.as_slice(), [LoadEffect::Failed { .. }]));
        assert_eq!(rig.gw.engine().loads.len(), 3);
        assert_eq!(rig.seq.phase(), LoadPhase::Failed);
        assert!(!rig.gw.is_busy());
    }

    #[test]
    fn audio_files_skip_the_dimension_wait() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        let effects = rig.seq.request(&mut rig.gw, &mut rig.sched, "song.flac", None, now);
        assert_eq!(effects.last(), Some(&LoadEffect::Playing));
        assert_eq!(rig.seq.phase(), LoadPhase::Playing);
        assert!(!rig.seq.resize_pending());
        assert!(!rig.gw.engine().is_paused());
    }

    #[test]
    fn supersede_invalidates_pending_work() {
        let mut rig = Rig::new();
        let now = rig.at(0);
        rig.seq.request(&mut rig.gw, &mut rig.sched, "a.mkv", None, now);
        rig.seq.supersede();
        rig.gw.engine_mut().dimensions = Some((640, 480));
        assert!(rig.run(0, 3000).is_empty());
        assert!(rig.gw.engine().writes.is_empty());
    }
}
