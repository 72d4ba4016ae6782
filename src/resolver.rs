//! Turns page URLs into directly playable stream URLs off the UI thread.

use crate::model::{StreamAuth, StreamQuality};
use crate::playlist;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveOptions {
    pub quality: StreamQuality,
    pub auth: Option<StreamAuth>,
}

impl ResolveOptions {
    pub fn new(quality: StreamQuality, auth: &StreamAuth) -> Self {
        Self {
            quality,
            auth: auth.enabled.then(|| auth.clone()),
        }
    }
}

pub trait UrlResolver: Send + Sync {
    fn resolve(&self, url: &str, options: &ResolveOptions) -> Result<String>;
}

/// URLs that already point at a media file need no resolution.
pub fn is_direct_media_url(url: &str) -> bool {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    playlist::is_media_file(Path::new(without_query))
}

/// Asks an external `yt-dlp` for the stream URL.
pub struct YtDlpResolver {
    program: PathBuf,
}

impl YtDlpResolver {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
        }
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlResolver for YtDlpResolver {
    fn resolve(&self, url: &str, options: &ResolveOptions) -> Result<String> {
        if is_direct_media_url(url) {
            return Ok(url.to_string());
        }

        let mut command = Command::new(&self.program);
        command
            .args(["--no-playlist", "--get-url", "-f"])
            .arg(options.quality.format_selector());
        if let Some(auth) = &options.auth {
            command
                .arg("--username")
                .arg(&auth.username)
                .arg("--password")
                .arg(&auth.password);
        }
        let output = command
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("no output").trim();
            anyhow::bail!("could not resolve {url}: {reason}");
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .with_context(|| format!("resolver returned nothing for {url}"))
    }
}

/// One batch of inputs and their per-item outcomes, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub inputs: Vec<String>,
    pub results: Vec<Result<String, String>>,
}

impl Resolution {
    pub fn resolved(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|result| result.as_ref().ok().cloned())
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|result| result.is_err()).count()
    }
}

/// Runs at most one resolution batch at a time; starting a new batch drops
/// the previous one's result.
pub struct ResolveJob {
    resolver: Arc<dyn UrlResolver>,
    running: Option<Receiver<Resolution>>,
}

impl ResolveJob {
    pub fn new(resolver: Arc<dyn UrlResolver>) -> Self {
        Self {
            resolver,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn start(&mut self, inputs: Vec<String>, options: ResolveOptions) {
        let (tx, rx) = mpsc::channel();
        let resolver = Arc::clone(&self.resolver);
        info!(count = inputs.len(), quality = options.quality.label(), "resolving urls");
        thread::spawn(move || {
            let results = inputs
                .iter()
                .map(|url| {
                    resolver
                        .resolve(url, &options)
                        .map_err(|err| format!("{err:#}"))
                })
                .collect();
            let _ = tx.send(Resolution { inputs, results });
        });
        self.running = Some(rx);
    }

    pub fn poll(&mut self) -> Option<Resolution> {
        let rx = self.running.as_ref()?;
        match rx.try_recv() {
            Ok(resolution) => {
                self.running = None;
                debug!(failures = resolution.failures(), "url resolution finished");
                Some(resolution)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.running = None;
                None
            }
        }
    }
}
