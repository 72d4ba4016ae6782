use crate::config;
use lofty::file::AudioFile;
use lofty::probe::Probe;
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use tracing::debug;

/// Reports a file's duration in seconds, or nothing if it cannot tell.
pub trait DurationProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Option<f64>;
}

/// Reads container headers: lofty's tag properties first, then symphonia's
/// codec parameters for formats lofty does not parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagDurationProbe;

impl DurationProbe for TagDurationProbe {
    fn probe(&self, path: &Path) -> Option<f64> {
        let path = config::strip_windows_verbatim_prefix(path);
        tag_duration(&path)
            .or_else(|| codec_duration(&path))
            .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
    }
}

fn tag_duration(path: &Path) -> Option<f64> {
    let tagged = Probe::open(path).and_then(|probe| probe.read()).ok()?;
    let duration = tagged.properties().duration();
    (!duration.is_zero()).then(|| duration.as_secs_f64())
}

fn codec_duration(path: &Path) -> Option<f64> {
    let file = File::open(path).ok()?;
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let probed = get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;

    probed
        .format
        .default_track()
        .and_then(|track| codec_params_seconds(&track.codec_params))
}

fn codec_params_seconds(codec_params: &CodecParameters) -> Option<f64> {
    if let (Some(time_base), Some(frame_count)) = (codec_params.time_base, codec_params.n_frames) {
        let time = time_base.calc_time(frame_count);
        return Some(time.seconds as f64 + time.frac);
    }

    codec_params
        .n_frames
        .zip(codec_params.sample_rate)
        .filter(|(_, sample_rate)| *sample_rate > 0)
        .map(|(frame_count, sample_rate)| frame_count as f64 / sample_rate as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbedDuration {
    pub media: String,
    pub seconds: f64,
}

struct ScanJob {
    cancel: Arc<AtomicBool>,
    results: Receiver<ProbedDuration>,
}

/// Single-slot batch prober. Starting a new batch interrupts the previous one;
/// the interruption flag is checked between files.
pub struct DurationScanner {
    probe: Arc<dyn DurationProbe>,
    job: Option<ScanJob>,
}

impl DurationScanner {
    pub fn new(probe: Arc<dyn DurationProbe>) -> Self {
        Self { probe, job: None }
    }

    pub fn start(&mut self, media: Vec<String>) {
        self.cancel();
        let files: Vec<String> = media
            .into_iter()
            .filter(|item| !config::is_stream_reference(item))
            .collect();
        if files.is_empty() {
            return;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let probe = Arc::clone(&self.probe);
        let worker_cancel = Arc::clone(&cancel);
        debug!(count = files.len(), "starting duration scan");

        thread::spawn(move || {
            for media in files {
                if worker_cancel.load(Ordering::Relaxed) {
                    break;
                }
                let Some(seconds) = probe.probe(&PathBuf::from(&media)) else {
                    continue;
                };
                if tx.send(ProbedDuration { media, seconds }).is_err() {
                    break;
                }
            }
        });

        self.job = Some(ScanJob {
            cancel,
            results: rx,
        });
    }

    pub fn cancel(&mut self) {
        if let Some(job) = self.job.take() {
            job.cancel.store(true, Ordering::Relaxed);
        }
    }

    pub fn is_running(&self) -> bool {
        self.job.is_some()
    }

    /// Drains finished results without blocking.
    pub fn poll(&mut self) -> Vec<ProbedDuration> {
        let mut out = Vec::new();
        let Some(job) = &self.job else {
            return out;
        };
        loop {
            match job.results.try_recv() {
                Ok(result) => out.push(result),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.job = None;
                    break;
                }
            }
        }
        out
    }
}

impl Drop for DurationScanner {
    fn drop(&mut self) {
        self.cancel();
    }
}
