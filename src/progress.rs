//! Polling-side progress tracking and end-of-file detection.
//!
//! Engine end-of-file notifications go missing under rapid switching, so the
//! detector also infers the end from position/duration samples. Any one of
//! the heuristics below is enough to advance.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Empirically tuned thresholds; overridable from the state file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EofThresholds {
    /// Position within this distance of the duration counts as the end.
    pub near_end_secs: f64,
    pub sustained_window_secs: f64,
    /// How long the sustained near-end condition must hold.
    pub sustained_debounce_secs: f64,
    /// No progress for this long while reads are unavailable.
    pub stall_secs: f64,
    /// The no-progress rule stays quiet this long after a track switch.
    pub switch_grace_secs: f64,
    pub stall_near_end_window_secs: f64,
    pub stall_near_end_secs: f64,
    pub progress_epsilon_secs: f64,
    pub playing_poll_ms: u64,
    pub paused_poll_ms: u64,
    /// Detection is off this long after a quality reload of the same stream.
    pub reload_suppress_ms: u64,
}

impl Default for EofThresholds {
    fn default() -> Self {
        Self {
            near_end_secs: 0.15,
            sustained_window_secs: 0.25,
            sustained_debounce_secs: 0.4,
            stall_secs: 0.8,
            switch_grace_secs: 1.0,
            stall_near_end_window_secs: 0.6,
            stall_near_end_secs: 1.2,
            progress_epsilon_secs: 0.01,
            playing_poll_ms: 100,
            paused_poll_ms: 250,
            reload_suppress_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub last_position: Option<f64>,
    pub last_duration: Option<f64>,
    pub last_progress_time: Option<Instant>,
    pub auto_next_deadline: Option<Instant>,
}

/// Reasons a tick is skipped before anything is read.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollGate {
    pub unsafe_window: bool,
    pub resize_pending: bool,
}

/// One set of engine reads. Non-finite values must already be filtered out.
#[derive(Debug, Clone, Default)]
pub struct ProgressReading {
    pub position: Option<f64>,
    pub duration: Option<f64>,
    /// Engine pause flag. Engines that keep the last frame open pause here
    /// on their own at the end of a file.
    pub paused: bool,
    /// Paused from the keyboard. Only the exact end check runs then.
    pub user_paused: bool,
    /// Path the engine reports as loaded.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    pub position: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    pub end_of_file: bool,
    /// Duration confirmed for the expected item.
    pub duration: Option<f64>,
    /// Slider update; absent while the user drags or reads are missing.
    pub timeline: Option<Timeline>,
}

#[derive(Debug)]
pub struct ProgressDetector {
    thresholds: EofThresholds,
    snapshot: ProgressSnapshot,
    last_switch_at: Option<Instant>,
    suppressed_until: Option<Instant>,
    ui_suspended_until: Option<Instant>,
    pending_advance: bool,
}

impl ProgressDetector {
    pub fn new(thresholds: EofThresholds) -> Self {
        Self {
            thresholds,
            snapshot: ProgressSnapshot::default(),
            last_switch_at: None,
            suppressed_until: None,
            ui_suspended_until: None,
            pending_advance: false,
        }
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn poll_interval(&self, paused: bool) -> Duration {
        Duration::from_millis(if paused {
            self.thresholds.paused_poll_ms
        } else {
            self.thresholds.playing_poll_ms
        })
    }

    pub fn on_track_switch(&mut self, now: Instant) {
        self.snapshot = ProgressSnapshot::default();
        self.last_switch_at = Some(now);
        self.pending_advance = false;
    }

    pub fn suspend_ui(&mut self, now: Instant, window: Duration) {
        self.ui_suspended_until = Some(now + window);
    }

    pub fn suppress_for_reload(&mut self, now: Instant) {
        self.suppressed_until =
            Some(now + Duration::from_millis(self.thresholds.reload_suppress_ms));
        self.snapshot.auto_next_deadline = None;
        self.pending_advance = false;
    }

    pub fn is_suppressed(&self, now: Instant) -> bool {
        self.suppressed_until.is_some_and(|until| now < until)
    }

    /// The engine announced end-of-file; the next tick advances.
    pub fn arm_pending_advance(&mut self) {
        self.pending_advance = true;
    }

    pub fn disarm_pending_advance(&mut self) {
        self.pending_advance = false;
    }

    pub fn has_pending_advance(&self) -> bool {
        self.pending_advance
    }

    pub fn should_skip(&self, gate: PollGate, now: Instant) -> bool {
        gate.unsafe_window
            || gate.resize_pending
            || self.ui_suspended_until.is_some_and(|until| now < until)
    }

    /// Runs one poll. `None` means the tick was skipped entirely.
    pub fn tick(
        &mut self,
        gate: PollGate,
        reading: &ProgressReading,
        expected_path: Option<&str>,
        dragging: bool,
        now: Instant,
    ) -> Option<TickReport> {
        if self.should_skip(gate, now) {
            return None;
        }
        let suppressed = self.is_suppressed(now);

        self.update_snapshot(reading, now);

        let mut report = TickReport::default();
        if let (Some(duration), Some(expected), Some(path)) =
            (reading.duration, expected_path, reading.path.as_deref())
            && duration > 0.0
            && expected == path
        {
            report.duration = Some(duration);
        }

        if !suppressed {
            if std::mem::take(&mut self.pending_advance) {
                report.end_of_file = true;
                return Some(report);
            }
            if self.detect_end(reading, now) {
                self.snapshot.auto_next_deadline = None;
                report.end_of_file = true;
                return Some(report);
            }
        }

        if !dragging
            && let (Some(position), Some(duration)) = (reading.position, reading.duration)
        {
            report.timeline = Some(Timeline {
                position: position.clamp(0.0, duration.max(0.0)),
                duration,
            });
        }
        Some(report)
    }

    fn update_snapshot(&mut self, reading: &ProgressReading, now: Instant) {
        if let Some(position) = reading.position {
            let advanced = self
                .snapshot
                .last_position
                .is_none_or(|last| position > last + self.thresholds.progress_epsilon_secs);
            if advanced {
                self.snapshot.last_progress_time = Some(now);
            }
            self.snapshot.last_position = Some(position);
        }
        if let Some(duration) = reading.duration.filter(|duration| *duration > 0.0) {
            self.snapshot.last_duration = Some(duration);
        }
    }

    fn detect_end(&mut self, reading: &ProgressReading, now: Instant) -> bool {
        let t = self.thresholds;
        let elapsed = |since: Option<Instant>| {
            since.map(|since| now.saturating_duration_since(since).as_secs_f64())
        };

        if let (Some(position), Some(duration)) = (reading.position, reading.duration)
            && duration > 0.0
            && position >= (duration - t.near_end_secs).max(0.0)
        {
            return true;
        }
        if reading.user_paused {
            self.snapshot.auto_next_deadline = None;
            return false;
        }

        let reads_missing = reading.position.is_none() || reading.duration.is_none();
        let remaining = self
            .snapshot
            .last_position
            .zip(self.snapshot.last_duration)
            .map(|(p, d)| d - p);

        if remaining.is_some_and(|left| left <= t.sustained_window_secs)
            && (reads_missing || reading.paused)
        {
            match self.snapshot.auto_next_deadline {
                None => {
                    self.snapshot.auto_next_deadline =
                        Some(now + Duration::from_secs_f64(t.sustained_debounce_secs));
                }
                Some(deadline) if now >= deadline => return true,
                Some(_) => {}
            }
        } else {
            self.snapshot.auto_next_deadline = None;
        }

        let since_progress = elapsed(self.snapshot.last_progress_time);
        if reads_missing
            && since_progress.is_some_and(|secs| secs > t.stall_secs)
            && elapsed(self.last_switch_at).is_none_or(|secs| secs >= t.switch_grace_secs)
        {
            return true;
        }

        remaining.is_some_and(|left| left <= t.stall_near_end_window_secs)
            && since_progress.is_some_and(|secs| secs > t.stall_near_end_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    fn playing(position: Option<f64>, duration: Option<f64>) -> ProgressReading {
        ProgressReading {
            position,
            duration,
            paused: false,
            user_paused: false,
            path: Some(String::from("a.mkv")),
        }
    }

    fn detector(t0: Instant) -> ProgressDetector {
        let mut detector = ProgressDetector::new(EofThresholds::default());
        detector.on_track_switch(t0);
        detector
    }

    fn tick(detector: &mut ProgressDetector, reading: &ProgressReading, now: Instant) -> TickReport {
        detector
            .tick(PollGate::default(), reading, Some("a.mkv"), false, now)
            .expect("tick ran")
    }

    #[test]
    fn position_at_the_very_end_advances_in_one_tick() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        let report = tick(&mut detector, &playing(Some(119.9), Some(120.0)), at(t0, 5000));
        assert!(report.end_of_file);
    }

    #[test]
    fn fresh_start_with_recent_progress_does_not_advance() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        let report = tick(&mut detector, &playing(Some(0.0), Some(120.0)), at(t0, 100));
        assert!(!report.end_of_file);
        assert_eq!(
            report.timeline,
            Some(Timeline {
                position: 0.0,
                duration: 120.0
            })
        );
        assert_eq!(report.duration, Some(120.0));
    }

    #[test]
    fn user_pause_near_the_end_only_stops_at_the_exact_end() {
        let t0 = Instant::now();
        let mut near_end = detector(t0);
        let mut reading = playing(Some(119.7), Some(120.0));
        reading.paused = true;
        reading.user_paused = true;
        for ms in [2000, 2500, 3500, 5000] {
            assert!(!tick(&mut near_end, &reading, at(t0, ms)).end_of_file);
        }
        assert_eq!(near_end.snapshot().auto_next_deadline, None);

        let mut at_end = detector(t0);
        reading.position = Some(120.0);
        assert!(tick(&mut at_end, &reading, at(t0, 2000)).end_of_file);
    }

    #[test]
    fn engine_pausing_itself_at_the_end_advances() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        let mut reading = playing(Some(119.8), Some(120.0));
        reading.paused = true;
        assert!(!tick(&mut detector, &reading, at(t0, 2000)).end_of_file);
        assert!(detector.snapshot().auto_next_deadline.is_some());
        assert!(!tick(&mut detector, &reading, at(t0, 2250)).end_of_file);
        assert!(tick(&mut detector, &reading, at(t0, 2400)).end_of_file);
    }

    #[test]
    fn sustained_near_end_needs_the_debounce_window() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        assert!(!tick(&mut detector, &playing(Some(119.8), Some(120.0)), at(t0, 2000)).end_of_file);
        assert_eq!(detector.snapshot().auto_next_deadline, None);
        assert!(!tick(&mut detector, &playing(Some(119.8), None), at(t0, 2200)).end_of_file);
        assert!(!tick(&mut detector, &playing(None, None), at(t0, 2450)).end_of_file);
        assert!(tick(&mut detector, &playing(None, None), at(t0, 2600)).end_of_file);
    }

    #[test]
    fn sustained_condition_resets_when_position_moves_away() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        tick(&mut detector, &playing(Some(119.8), Some(120.0)), at(t0, 2000));
        tick(&mut detector, &playing(Some(10.0), Some(120.0)), at(t0, 2100));
        assert_eq!(detector.snapshot().auto_next_deadline, None);
    }

    #[test]
    fn missing_reads_after_stall_advance_only_past_switch_grace() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        tick(&mut detector, &playing(Some(50.0), Some(120.0)), at(t0, 100));
        assert!(!tick(&mut detector, &playing(None, None), at(t0, 950)).end_of_file);

        let mut detector = ProgressDetector::new(EofThresholds::default());
        detector.on_track_switch(t0);
        tick(&mut detector, &playing(Some(50.0), Some(120.0)), at(t0, 1500));
        assert!(!tick(&mut detector, &playing(None, None), at(t0, 2000)).end_of_file);
        assert!(tick(&mut detector, &playing(None, None), at(t0, 2400)).end_of_file);
    }

    #[test]
    fn stall_near_end_with_live_reads_advances() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        tick(&mut detector, &playing(Some(119.5), Some(120.0)), at(t0, 3000));
        assert_eq!(detector.snapshot().auto_next_deadline, None);
        assert!(!tick(&mut detector, &playing(Some(119.5), Some(120.0)), at(t0, 3500)).end_of_file);
        assert!(tick(&mut detector, &playing(Some(119.5), Some(120.0)), at(t0, 4300)).end_of_file);
    }

    #[test]
    fn gates_skip_the_whole_tick() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        let reading = playing(Some(119.99), Some(120.0));
        let gate = PollGate {
            unsafe_window: true,
            resize_pending: false,
        };
        assert_eq!(detector.tick(gate, &reading, None, false, t0), None);

        detector.suspend_ui(t0, Duration::from_millis(300));
        assert_eq!(
            detector.tick(PollGate::default(), &reading, None, false, at(t0, 100)),
            None
        );
        assert!(detector
            .tick(PollGate::default(), &reading, None, false, at(t0, 400))
            .is_some());
    }

    #[test]
    fn quality_reload_suppresses_detection_but_not_timeline() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        detector.arm_pending_advance();
        detector.suppress_for_reload(t0);
        let report = tick(&mut detector, &playing(Some(119.99), Some(120.0)), at(t0, 500));
        assert!(!report.end_of_file);
        assert!(report.timeline.is_some());
        assert!(!detector.has_pending_advance());
    }

    #[test]
    fn engine_end_event_is_consumed_on_next_tick() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        detector.arm_pending_advance();
        assert!(tick(&mut detector, &playing(Some(3.0), Some(120.0)), at(t0, 100)).end_of_file);
        assert!(!tick(&mut detector, &playing(Some(3.1), Some(120.0)), at(t0, 200)).end_of_file);
    }

    #[test]
    fn duration_is_reported_only_for_the_expected_path() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        let reading = playing(Some(1.0), Some(300.0));
        let report = detector
            .tick(PollGate::default(), &reading, Some("b.mkv"), false, at(t0, 100))
            .expect("tick ran");
        assert_eq!(report.duration, None);
    }

    #[test]
    fn dragging_hides_timeline_updates() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        let report = detector
            .tick(
                PollGate::default(),
                &playing(Some(1.0), Some(300.0)),
                Some("a.mkv"),
                true,
                at(t0, 100),
            )
            .expect("tick ran");
        assert_eq!(report.timeline, None);
    }
}
