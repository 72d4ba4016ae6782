//! Seek-preview thumbnails: a bounded bucket cache plus a single-slot worker.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSettings {
    pub snap_secs: f64,
    /// Nearest-bucket fallback reaches at most this many buckets away.
    pub max_bucket_distance: u32,
    pub debounce_ms: u64,
    pub capacity: usize,
    pub width: u32,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            snap_secs: 2.0,
            max_bucket_distance: 24,
            debounce_ms: 80,
            capacity: 240,
            width: 320,
        }
    }
}

impl ThumbnailSettings {
    pub fn bucket_of(&self, seconds: f64) -> i64 {
        let snap = if self.snap_secs > 0.0 { self.snap_secs } else { 1.0 };
        (seconds.max(0.0) / snap).round() as i64
    }

    pub fn bucket_seconds(&self, bucket: i64) -> f64 {
        bucket as f64 * self.snap_secs.max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub media: String,
    pub bucket: i64,
}

impl BucketKey {
    pub fn new(media: &str, bucket: i64) -> Self {
        Self {
            media: media.to_string(),
            bucket,
        }
    }
}

/// Evicts by insertion order, not by access.
#[derive(Debug)]
pub struct ThumbnailCache {
    entries: HashMap<BucketKey, PathBuf>,
    order: VecDeque<BucketKey>,
    capacity: usize,
}

impl ThumbnailCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &BucketKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: BucketKey, path: PathBuf) {
        if self.entries.insert(key.clone(), path).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn get(&self, key: &BucketKey) -> Option<&Path> {
        self.entries.get(key).map(PathBuf::as_path)
    }

    /// Exact bucket first, then the closest cached bucket of the same media
    /// within `max_distance`. Ties prefer the earlier bucket.
    pub fn lookup(&self, media: &str, bucket: i64, max_distance: u32) -> Option<&Path> {
        if let Some(path) = self.get(&BucketKey::new(media, bucket)) {
            return Some(path);
        }
        (1..=i64::from(max_distance)).find_map(|distance| {
            self.get(&BucketKey::new(media, bucket - distance))
                .or_else(|| self.get(&BucketKey::new(media, bucket + distance)))
        })
    }
}

/// Renders one still frame of `media` at `seconds`.
pub trait ThumbnailGenerator: Send + Sync {
    fn generate(&self, media: &str, seconds: f64) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq)]
struct Job {
    key: BucketKey,
    seconds: f64,
    seq: u64,
}

struct Completion {
    job: Job,
    result: Result<PathBuf, String>,
}

pub struct ThumbnailService {
    settings: ThumbnailSettings,
    cache: ThumbnailCache,
    generator: Arc<dyn ThumbnailGenerator>,
    recent_requests: HashMap<BucketKey, Instant>,
    latest_seq: u64,
    in_flight: Option<BucketKey>,
    pending: Option<Job>,
    done_tx: Sender<Completion>,
    done_rx: Receiver<Completion>,
}

impl ThumbnailService {
    pub fn new(settings: ThumbnailSettings, generator: Arc<dyn ThumbnailGenerator>) -> Self {
        let (done_tx, done_rx) = mpsc::channel();
        Self {
            settings,
            cache: ThumbnailCache::new(settings.capacity),
            generator,
            recent_requests: HashMap::new(),
            latest_seq: 0,
            in_flight: None,
            pending: None,
            done_tx,
            done_rx,
        }
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.cache
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Requests a preview for `media` at `seconds`. Returns whatever cached
    /// frame can be shown right away; a missing exact bucket is generated in
    /// the background.
    pub fn request(&mut self, media: &str, seconds: f64, now: Instant) -> Option<PathBuf> {
        let bucket = self.settings.bucket_of(seconds);
        let key = BucketKey::new(media, bucket);
        self.latest_seq += 1;

        let shown = self
            .cache
            .lookup(media, bucket, self.settings.max_bucket_distance)
            .map(Path::to_path_buf);
        if self.cache.contains(&key) {
            return shown;
        }

        let debounce = Duration::from_millis(self.settings.debounce_ms);
        self.recent_requests
            .retain(|_, at| now.saturating_duration_since(*at) < debounce);
        // Dropped requests still push the window forward.
        if self.recent_requests.insert(key.clone(), now).is_some() {
            return shown;
        }

        let job = Job {
            key,
            seconds: self.settings.bucket_seconds(bucket),
            seq: self.latest_seq,
        };
        if self.in_flight.as_ref() == Some(&job.key) {
            return shown;
        }
        if self.in_flight.is_some() {
            self.pending = Some(job);
        } else {
            self.spawn(job);
        }
        shown
    }

    /// Collects finished frames. Returns the frame to display, if a result
    /// belongs to the newest request and `current_media` is still its media.
    pub fn poll(&mut self, current_media: Option<&str>) -> Option<PathBuf> {
        let mut display = None;
        while let Ok(Completion { job, result }) = self.done_rx.try_recv() {
            if self.in_flight.as_ref() == Some(&job.key) {
                self.in_flight = None;
            }
            match result {
                Ok(path) => {
                    let fresh = job.seq == self.latest_seq
                        && current_media == Some(job.key.media.as_str());
                    self.cache.insert(job.key, path.clone());
                    if fresh {
                        display = Some(path);
                    }
                }
                Err(err) => debug!(media = %job.key.media, bucket = job.key.bucket, "thumbnail failed: {err}"),
            }
        }
        if self.in_flight.is_none()
            && let Some(job) = self.pending.take()
        {
            self.spawn(job);
        }
        display
    }

    /// Forgets pending work, e.g. when the current media changes.
    pub fn clear_pending(&mut self) {
        self.pending = None;
        self.latest_seq += 1;
    }

    fn spawn(&mut self, job: Job) {
        self.in_flight = Some(job.key.clone());
        let generator = Arc::clone(&self.generator);
        let tx = self.done_tx.clone();
        thread::spawn(move || {
            let result = generator
                .generate(&job.key.media, job.seconds)
                .map_err(|err| format!("{err:#}"));
            let _ = tx.send(Completion { job, result });
        });
    }
}

/// Extracts frames with an external `ffmpeg` and downsizes them with `image`.
pub struct FfmpegThumbnailer {
    program: PathBuf,
    output_dir: PathBuf,
    width: u32,
}

impl FfmpegThumbnailer {
    pub fn new(output_dir: PathBuf, width: u32) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            output_dir,
            width: width.max(16),
        }
    }

    pub fn output_path(&self, media: &str, seconds: f64) -> PathBuf {
        let digest = Sha256::digest(media.as_bytes());
        let mut name = String::with_capacity(40);
        for byte in digest.iter().take(12) {
            let _ = write!(name, "{byte:02x}");
        }
        let _ = write!(name, "_{}.jpg", (seconds * 1000.0).round() as i64);
        self.output_dir.join(name)
    }
}

impl ThumbnailGenerator for FfmpegThumbnailer {
    fn generate(&self, media: &str, seconds: f64) -> Result<PathBuf> {
        let output = self.output_path(media, seconds);
        if output.is_file() {
            return Ok(output);
        }
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "failed to create thumbnail directory {}",
                self.output_dir.display()
            )
        })?;

        let status = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-ss"])
            .arg(format!("{seconds:.3}"))
            .arg("-i")
            .arg(media)
            .args(["-frames:v", "1", "-y"])
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        if !status.success() {
            anyhow::bail!("frame extraction exited with {status}");
        }

        let frame = image::open(&output)
            .with_context(|| format!("failed to decode frame {}", output.display()))?;
        if frame.width() > self.width {
            let height = (u64::from(frame.height()) * u64::from(self.width)
                / u64::from(frame.width().max(1))) as u32;
            if let Err(err) = frame.thumbnail(self.width, height.max(1)).save(&output) {
                warn!(path = %output.display(), "failed to downsize thumbnail: {err}");
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingGenerator {
        calls: Mutex<Vec<(String, f64)>>,
        delay: Duration,
    }

    impl ThumbnailGenerator for CountingGenerator {
        fn generate(&self, media: &str, seconds: f64) -> Result<PathBuf> {
            thread::sleep(self.delay);
            self.calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((media.to_string(), seconds));
            Ok(PathBuf::from(format!("{media}@{seconds}.jpg")))
        }
    }

    fn settle(service: &mut ThumbnailService, media: &str) -> Vec<PathBuf> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut shown = Vec::new();
        while Instant::now() < deadline {
            shown.extend(service.poll(Some(media)));
            if !service.is_generating() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        shown
    }

    #[test]
    fn eviction_at_capacity_removes_exactly_the_oldest() {
        let mut cache = ThumbnailCache::new(3);
        for bucket in 0..3 {
            cache.insert(BucketKey::new("a", bucket), PathBuf::from(format!("{bucket}")));
        }
        assert!(cache.get(&BucketKey::new("a", 0)).is_some());
        cache.insert(BucketKey::new("a", 3), PathBuf::from("3"));

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&BucketKey::new("a", 0)));
        for bucket in 1..4 {
            assert!(cache.contains(&BucketKey::new("a", bucket)));
        }
    }

    #[test]
    fn lookup_falls_back_to_nearest_bucket_within_range() {
        let mut cache = ThumbnailCache::new(10);
        cache.insert(BucketKey::new("a", 10), PathBuf::from("ten"));
        cache.insert(BucketKey::new("b", 11), PathBuf::from("other"));

        assert_eq!(cache.lookup("a", 12, 24), Some(Path::new("ten")));
        assert_eq!(cache.lookup("a", 40, 24), None);
        assert_eq!(cache.lookup("b", 40, 24), None);
    }

    #[test]
    fn buckets_snap_to_nearest_interval() {
        let settings = ThumbnailSettings::default();
        assert_eq!(settings.bucket_of(0.9), 0);
        assert_eq!(settings.bucket_of(1.1), 1);
        assert_eq!(settings.bucket_of(-5.0), 0);
        assert_eq!(settings.bucket_seconds(3), 6.0);
    }

    #[test]
    fn same_bucket_within_debounce_generates_once() {
        let generator = Arc::new(CountingGenerator::default());
        let mut service = ThumbnailService::new(ThumbnailSettings::default(), generator.clone());
        let t0 = Instant::now();

        service.request("a.mkv", 10.2, t0);
        settle(&mut service, "a.mkv");
        service.cache.entries.clear();
        service.cache.order.clear();
        service.request("a.mkv", 10.4, t0 + Duration::from_millis(30));
        settle(&mut service, "a.mkv");

        assert_eq!(generator.calls.lock().expect("lock").len(), 1);
    }

    #[test]
    fn dropped_requests_keep_the_debounce_window_open() {
        let generator = Arc::new(CountingGenerator::default());
        let mut service = ThumbnailService::new(ThumbnailSettings::default(), generator.clone());
        let t0 = Instant::now();

        for ms in [0, 60, 120, 180] {
            service.request("a.mkv", 10.2, t0 + Duration::from_millis(ms));
            settle(&mut service, "a.mkv");
            service.cache.entries.clear();
            service.cache.order.clear();
        }
        assert_eq!(generator.calls.lock().expect("lock").len(), 1);

        service.request("a.mkv", 10.2, t0 + Duration::from_millis(300));
        settle(&mut service, "a.mkv");
        assert_eq!(generator.calls.lock().expect("lock").len(), 2);
    }

    #[test]
    fn only_latest_pending_request_survives() {
        let generator = Arc::new(CountingGenerator {
            calls: Mutex::new(Vec::new()),
            delay: Duration::from_millis(40),
        });
        let mut service = ThumbnailService::new(ThumbnailSettings::default(), generator.clone());
        let t0 = Instant::now();

        service.request("a.mkv", 0.0, t0);
        service.request("a.mkv", 20.0, t0);
        service.request("a.mkv", 40.0, t0);
        let shown = settle(&mut service, "a.mkv");
        let shown = [shown, settle(&mut service, "a.mkv")].concat();

        let calls = generator.calls.lock().expect("lock").clone();
        assert_eq!(
            calls,
            vec![(String::from("a.mkv"), 0.0), (String::from("a.mkv"), 40.0)]
        );
        assert_eq!(shown, vec![PathBuf::from("a.mkv@40.jpg")]);
        assert!(service.cache().contains(&BucketKey::new("a.mkv", 0)));
    }

    #[test]
    fn result_for_another_media_is_cached_not_shown() {
        let generator = Arc::new(CountingGenerator::default());
        let mut service = ThumbnailService::new(ThumbnailSettings::default(), generator);
        service.request("a.mkv", 4.0, Instant::now());
        let shown = settle(&mut service, "b.mkv");
        assert!(shown.is_empty());
        assert!(service.cache().contains(&BucketKey::new("a.mkv", 2)));
    }

    #[test]
    fn output_names_are_stable_per_media_and_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let thumbnailer = FfmpegThumbnailer::new(dir.path().to_path_buf(), 320);
        let first = thumbnailer.output_path("/m/a.mkv", 4.0);
        assert_eq!(first, thumbnailer.output_path("/m/a.mkv", 4.0));
        assert_ne!(first, thumbnailer.output_path("/m/b.mkv", 4.0));
        assert_ne!(first, thumbnailer.output_path("/m/a.mkv", 6.0));
        assert!(first.starts_with(dir.path()));
    }
}
