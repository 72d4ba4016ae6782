use crate::config;
use crate::core::SortKey;
use crate::engine::{MediaEngine, NullEngine, RodioEngine, TrackKind};
use crate::logging;
use crate::model::{StreamQuality, VideoAdjustment};
use crate::player::{Collaborators, Player, STATUS_LIFETIME, UiEvent};
use crate::thumbnails::FfmpegThumbnailer;
use crate::ui;
use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::Rect;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

type EnginePlayer = Player<Box<dyn MediaEngine>>;

const INPUT_POLL: Duration = Duration::from_millis(33);
const REDRAW_INTERVAL: Duration = Duration::from_millis(250);
const SEEK_STEP: f64 = 5.0;
const SEEK_STEP_LARGE: f64 = 30.0;
const VOLUME_STEP: i32 = 5;
const ZOOM_STEP: f64 = 0.1;
const PAN_STEP: f64 = 0.05;
const PICTURE_STEP: i32 = 5;

#[derive(Debug, Clone, Default)]
pub struct AppStartupOptions {
    pub inputs: Vec<String>,
    pub recursive: bool,
}

/// What the screen shows, fed by [`UiEvent`]s.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub selected: usize,
    pub title: String,
    pub position: f64,
    pub duration: f64,
    pub playing: bool,
    pub idle: bool,
    pub video_size: Option<(u32, u32)>,
    pub chapters: Vec<f64>,
    pub thumbnail: Option<PathBuf>,
    pub command_mode: bool,
    pub command_buffer: String,
    pub dirty: bool,
    seeking: bool,
    status: Option<(String, Instant)>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            selected: 0,
            title: String::from("-"),
            position: 0.0,
            duration: 0.0,
            playing: false,
            idle: true,
            video_size: None,
            chapters: Vec::new(),
            thumbnail: None,
            command_mode: false,
            command_buffer: String::new(),
            dirty: true,
            seeking: false,
            status: None,
        }
    }
}

impl ViewState {
    pub fn apply(&mut self, event: UiEvent, playlist_len: usize, now: Instant) {
        match event {
            UiEvent::Status(text) => self.status = Some((text, now + STATUS_LIFETIME)),
            UiEvent::Timeline { position, duration } => {
                self.position = position;
                self.duration = duration;
            }
            UiEvent::Transport { playing } => {
                self.playing = playing;
                if playing {
                    self.idle = false;
                }
            }
            UiEvent::Idle => {
                self.idle = true;
                self.playing = false;
                self.video_size = None;
                self.chapters.clear();
                self.thumbnail = None;
                self.title = String::from("-");
            }
            UiEvent::Resize { width, height } => self.video_size = Some((width, height)),
            UiEvent::Title(title) => {
                self.title = title;
                self.idle = false;
                self.thumbnail = None;
            }
            UiEvent::PlaylistChanged => {
                self.selected = self.selected.min(playlist_len.saturating_sub(1));
            }
            UiEvent::Chapters(chapters) => self.chapters = chapters,
            UiEvent::Thumbnail(path) => self.thumbnail = Some(path),
        }
        self.dirty = true;
    }

    /// Current overlay text, if it has not expired yet.
    pub fn status_text(&self, now: Instant) -> Option<&str> {
        self.status
            .as_ref()
            .filter(|(_, expires)| now < *expires)
            .map(|(text, _)| text.as_str())
    }

    /// Drops an expired overlay. Returns true when something was removed.
    pub fn expire_status(&mut self, now: Instant) -> bool {
        if self
            .status
            .as_ref()
            .is_some_and(|(_, expires)| now >= *expires)
        {
            self.status = None;
            self.dirty = true;
            return true;
        }
        false
    }

    pub fn select_next(&mut self, playlist_len: usize) {
        if playlist_len > 0 {
            self.selected = (self.selected + 1).min(playlist_len - 1);
            self.dirty = true;
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
        self.dirty = true;
    }

    fn local_status(&mut self, text: impl Into<String>, now: Instant) {
        self.apply(UiEvent::Status(text.into()), 0, now);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Add { inputs: Vec<String>, recursive: bool },
    Save(PathBuf),
    Load(PathBuf),
    Sort { key: SortKey, reverse: bool },
    Folders,
    Quality(StreamQuality),
    Volume(u8),
    Seek(f64),
    Tracks,
    AudioTrack(i64),
    /// `None` hides subtitles.
    SubtitleTrack(Option<i64>),
    Aspect(String),
    Clear,
}

pub fn parse_command(raw: &str) -> Result<Command, String> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(String::from("No command"));
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => Ok(Command::Help),
        "add" => {
            let mut recursive = false;
            let mut inputs = Vec::new();
            for word in rest.split_whitespace() {
                if word == "-r" {
                    recursive = true;
                } else {
                    inputs.push(word.to_string());
                }
            }
            if inputs.is_empty() {
                return Err(String::from("Usage: add [-r] <path|url>..."));
            }
            Ok(Command::Add { inputs, recursive })
        }
        "save" | "load" if rest.is_empty() => Err(format!("Usage: {command} <file.m3u>")),
        "save" => Ok(Command::Save(PathBuf::from(rest))),
        "load" => Ok(Command::Load(PathBuf::from(rest))),
        "sort" => {
            let mut words = rest.split_whitespace();
            let key = match words.next() {
                Some("name") => SortKey::Name,
                Some("duration") => SortKey::Duration,
                _ => return Err(String::from("Usage: sort <name|duration> [desc]")),
            };
            let reverse = matches!(words.next(), Some("desc"));
            Ok(Command::Sort { key, reverse })
        }
        "folders" => Ok(Command::Folders),
        "quality" => StreamQuality::parse(rest)
            .map(Command::Quality)
            .ok_or_else(|| String::from("Usage: quality <best|1080|720|480|audio>")),
        "volume" => rest
            .parse::<u8>()
            .ok()
            .filter(|volume| *volume <= 100)
            .map(Command::Volume)
            .ok_or_else(|| String::from("Usage: volume <0-100>")),
        "seek" => rest
            .parse::<f64>()
            .ok()
            .filter(|seconds| seconds.is_finite())
            .map(Command::Seek)
            .ok_or_else(|| String::from("Usage: seek <seconds>")),
        "tracks" => Ok(Command::Tracks),
        "audio" => rest
            .parse::<i64>()
            .map(Command::AudioTrack)
            .map_err(|_| String::from("Usage: audio <track id>")),
        "sub" => match rest {
            "off" | "no" => Ok(Command::SubtitleTrack(None)),
            id => id
                .parse::<i64>()
                .map(|id| Command::SubtitleTrack(Some(id)))
                .map_err(|_| String::from("Usage: sub <track id|off>")),
        },
        "aspect" if rest.is_empty() => Err(String::from("Usage: aspect <auto|16:9|4:3|16:10|2.35:1|2.39:1>")),
        "aspect" => Ok(Command::Aspect(rest.to_string())),
        "clear" => Ok(Command::Clear),
        _ => Err(String::from("Unknown command. Use :help")),
    }
}

pub fn run() -> Result<()> {
    run_with_startup(AppStartupOptions::default())
}

pub fn run_with_startup(startup: AppStartupOptions) -> Result<()> {
    if let Err(err) = config::log_path().and_then(|path| logging::init(&path)) {
        eprintln!("logging disabled: {err:#}");
    }

    let state = config::load_state()?;
    let engine: Box<dyn MediaEngine> = match RodioEngine::new() {
        Ok(engine) => Box::new(engine),
        Err(err) => {
            warn!("no audio output, running silent: {err:#}");
            Box::new(NullEngine::new())
        }
    };
    let mut collaborators = Collaborators::default();
    match config::thumbnail_dir() {
        Ok(dir) => {
            let width = state.tuning.thumbnails.width;
            collaborators.thumbnailer = Some(Arc::new(FfmpegThumbnailer::new(dir, width)));
        }
        Err(err) => warn!("thumbnails disabled: {err:#}"),
    }
    let mut player = Player::new(engine, state, collaborators).with_state_file(config::state_path()?);
    info!(inputs = startup.inputs.len(), "starting");
    if !startup.inputs.is_empty() {
        player.add_inputs(&startup.inputs, startup.recursive, Instant::now());
    }

    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut view = ViewState::default();
    let mut last_draw = Instant::now();
    let mut regions = ui::Regions::default();

    let result: Result<()> = loop {
        let now = Instant::now();
        player.tick(now);
        let playlist_len = player.core().len();
        for ui_event in player.drain_events() {
            view.apply(ui_event, playlist_len, now);
        }
        view.expire_status(now);

        if view.dirty || last_draw.elapsed() > REDRAW_INTERVAL {
            terminal.draw(|frame| {
                regions = ui::regions(frame.area());
                ui::draw(frame, &view, player.core(), player.state(), now);
            })?;
            view.dirty = false;
            last_draw = Instant::now();
        }

        let timeout = player
            .next_wakeup()
            .map_or(INPUT_POLL, |due| due.saturating_duration_since(now).min(INPUT_POLL));
        if !event::poll(timeout)? {
            continue;
        }

        match event::read()? {
            Event::Mouse(mouse) => handle_mouse(&mut player, &mut view, mouse, regions),
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if handle_key(&mut player, &mut view, key, Instant::now()) {
                    break Ok(());
                }
            }
            Event::Resize(..) => view.dirty = true,
            _ => {}
        }
    };

    player.shutdown();
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    result
}

/// Returns true when the user asked to quit.
fn handle_key(player: &mut EnginePlayer, view: &mut ViewState, key: KeyEvent, now: Instant) -> bool {
    if view.command_mode {
        match key.code {
            KeyCode::Esc => {
                view.command_mode = false;
                view.command_buffer.clear();
            }
            KeyCode::Enter => {
                let raw = std::mem::take(&mut view.command_buffer);
                view.command_mode = false;
                run_command(player, view, &raw, now);
            }
            KeyCode::Backspace => {
                view.command_buffer.pop();
            }
            KeyCode::Char(ch) => view.command_buffer.push(ch),
            _ => {}
        }
        view.dirty = true;
        return false;
    }

    let shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let seek_step = if shift { SEEK_STEP_LARGE } else { SEEK_STEP };
    let playlist_len = player.core().len();

    match key.code {
        KeyCode::Char('c') if ctrl => return true,
        KeyCode::Char('q') => return true,
        KeyCode::Left if ctrl => player.pan(-PAN_STEP, 0.0, now),
        KeyCode::Right if ctrl => player.pan(PAN_STEP, 0.0, now),
        KeyCode::Up if ctrl => player.pan(0.0, -PAN_STEP, now),
        KeyCode::Down if ctrl => player.pan(0.0, PAN_STEP, now),
        KeyCode::Left => player.seek_relative(-seek_step, now),
        KeyCode::Right => player.seek_relative(seek_step, now),
        KeyCode::Down => view.select_next(playlist_len),
        KeyCode::Up => view.select_prev(),
        KeyCode::Char('J') => {
            if player.reorder(view.selected, view.selected + 1) {
                view.selected += 1;
            }
        }
        KeyCode::Char('K') => {
            if view.selected > 0 && player.reorder(view.selected, view.selected - 1) {
                view.selected -= 1;
            }
        }
        KeyCode::Enter => player.play_index(view.selected, now),
        KeyCode::Delete => player.remove_indices(&[view.selected], now),
        KeyCode::Char(' ') => player.toggle_pause(now),
        KeyCode::Char('n') => player.next(now),
        KeyCode::Char('p') => player.previous(now),
        KeyCode::Char('S') => player.stop(now),
        KeyCode::Char('+') | KeyCode::Char('=') => player.adjust_volume(VOLUME_STEP, now),
        KeyCode::Char('-') => player.adjust_volume(-VOLUME_STEP, now),
        KeyCode::Char('m') => player.toggle_mute(now),
        KeyCode::Char('s') => player.toggle_shuffle(),
        KeyCode::Char('r') => player.cycle_repeat(),
        KeyCode::Char(']') => player.change_speed_step(1, now),
        KeyCode::Char('[') => player.change_speed_step(-1, now),
        KeyCode::Char('z') => player.zoom(ZOOM_STEP, now),
        KeyCode::Char('x') => player.zoom(-ZOOM_STEP, now),
        KeyCode::Char('0') => player.reset_view(now),
        KeyCode::Char('b') => player.adjust_video(VideoAdjustment::Brightness, PICTURE_STEP, now),
        KeyCode::Char('B') => player.adjust_video(VideoAdjustment::Brightness, -PICTURE_STEP, now),
        KeyCode::Char('c') => player.adjust_video(VideoAdjustment::Contrast, PICTURE_STEP, now),
        KeyCode::Char('C') => player.adjust_video(VideoAdjustment::Contrast, -PICTURE_STEP, now),
        KeyCode::Char('v') => player.adjust_video(VideoAdjustment::Saturation, PICTURE_STEP, now),
        KeyCode::Char('V') => player.adjust_video(VideoAdjustment::Saturation, -PICTURE_STEP, now),
        KeyCode::Char('g') => player.adjust_video(VideoAdjustment::Gamma, PICTURE_STEP, now),
        KeyCode::Char('G') => player.adjust_video(VideoAdjustment::Gamma, -PICTURE_STEP, now),
        KeyCode::Char('o') => player.rotate_video(now),
        KeyCode::Char('a') => player.cycle_aspect_ratio(now),
        KeyCode::Char(':') => view.command_mode = true,
        _ => {}
    }
    view.dirty = true;
    false
}

fn handle_mouse(player: &mut EnginePlayer, view: &mut ViewState, mouse: MouseEvent, regions: ui::Regions) {
    let now = Instant::now();
    let inside_playlist = point_in_rect(mouse.column, mouse.row, regions.playlist);
    let on_timeline = point_in_rect(mouse.column, mouse.row, regions.timeline);
    let seconds = ui::seconds_at(mouse.column, regions.timeline, view.duration);

    match mouse.kind {
        MouseEventKind::ScrollDown if inside_playlist => view.select_next(player.core().len()),
        MouseEventKind::ScrollUp if inside_playlist => view.select_prev(),
        MouseEventKind::Down(MouseButton::Left) if on_timeline => {
            view.seeking = true;
            player.set_dragging(true);
            if let Some(seconds) = seconds {
                view.position = seconds;
                if let Some(path) = player.request_thumbnail(seconds, now) {
                    view.thumbnail = Some(path);
                }
            }
        }
        MouseEventKind::Drag(MouseButton::Left) if view.seeking => {
            if let Some(seconds) = seconds {
                view.position = seconds;
                if let Some(path) = player.request_thumbnail(seconds, now) {
                    view.thumbnail = Some(path);
                }
            }
        }
        MouseEventKind::Up(MouseButton::Left) if view.seeking => {
            view.seeking = false;
            player.set_dragging(false);
            if on_timeline && let Some(seconds) = seconds {
                player.seek_to(seconds, now);
            }
        }
        _ => return,
    }
    view.dirty = true;
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    if rect.width == 0 || rect.height == 0 {
        return false;
    }
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

fn run_command(player: &mut EnginePlayer, view: &mut ViewState, raw: &str, now: Instant) {
    let command = match parse_command(raw) {
        Ok(command) => command,
        Err(usage) => {
            view.local_status(usage, now);
            return;
        }
    };

    match command {
        Command::Help => view.local_status(
            "Commands: add [-r] <path|url> | save <m3u> | load <m3u> | sort <name|duration> [desc] | folders | quality <q> | volume <n> | seek <s> | tracks | audio <id> | sub <id|off> | aspect <ratio> | clear",
            now,
        ),
        Command::Add { inputs, recursive } => player.add_inputs(&inputs, recursive, now),
        Command::Save(path) => {
            if let Err(err) = player.save_playlist(&path) {
                warn!("playlist save failed: {err:#}");
                view.local_status(format!("save error: {err:#}"), now);
            }
        }
        Command::Load(path) => {
            if let Err(err) = player.load_playlist(&path, now) {
                warn!("playlist load failed: {err:#}");
                view.local_status(format!("load error: {err:#}"), now);
            } else {
                view.selected = 0;
            }
        }
        Command::Sort { key, reverse } => player.sort(key, reverse),
        Command::Folders => player.toggle_sort_include_folders(),
        Command::Quality(quality) => player.set_quality(quality, now),
        Command::Volume(volume) => player.set_volume(volume, now),
        Command::Seek(seconds) => player.seek_to(seconds, now),
        Command::Tracks => {
            let list = |kind| {
                player
                    .tracks(kind)
                    .iter()
                    .map(|track| track.label())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let (audio, subtitles) = (list(TrackKind::Audio), list(TrackKind::Subtitle));
            let text = match (audio.is_empty(), subtitles.is_empty()) {
                (true, true) => String::from("No tracks"),
                (false, true) => format!("Audio: {audio}"),
                (true, false) => format!("Subs: {subtitles}"),
                (false, false) => format!("Audio: {audio} | Subs: {subtitles}"),
            };
            view.local_status(text, now);
        }
        Command::AudioTrack(id) => {
            player.select_track(TrackKind::Audio, Some(id), now);
        }
        Command::SubtitleTrack(id) => {
            player.select_track(TrackKind::Subtitle, id, now);
        }
        Command::Aspect(ratio) => {
            player.set_aspect_ratio(&ratio, now);
        }
        Command::Clear => {
            let all: Vec<usize> = (0..player.core().len()).collect();
            player.remove_indices(&all, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_their_arguments() {
        assert_eq!(
            parse_command("add -r ~/videos https://x.test/v"),
            Ok(Command::Add {
                inputs: vec![String::from("~/videos"), String::from("https://x.test/v")],
                recursive: true,
            })
        );
        assert_eq!(
            parse_command("sort duration desc"),
            Ok(Command::Sort {
                key: SortKey::Duration,
                reverse: true
            })
        );
        assert_eq!(
            parse_command(" save my list.m3u "),
            Ok(Command::Save(PathBuf::from("my list.m3u")))
        );
        assert_eq!(
            parse_command("quality 720"),
            Ok(Command::Quality(StreamQuality::P720))
        );
        assert_eq!(parse_command("volume 40"), Ok(Command::Volume(40)));
        assert_eq!(parse_command("audio 2"), Ok(Command::AudioTrack(2)));
        assert_eq!(parse_command("sub off"), Ok(Command::SubtitleTrack(None)));
        assert_eq!(parse_command("sub 3"), Ok(Command::SubtitleTrack(Some(3))));
        assert_eq!(
            parse_command("aspect 16:9"),
            Ok(Command::Aspect(String::from("16:9")))
        );
    }

    #[test]
    fn bad_commands_report_usage() {
        assert!(parse_command("").is_err());
        assert!(parse_command("add").is_err_and(|usage| usage.starts_with("Usage")));
        assert!(parse_command("load").is_err());
        assert!(parse_command("sort size").is_err());
        assert!(parse_command("volume 140").is_err());
        assert!(parse_command("seek nan").is_err());
        assert!(parse_command("audio en").is_err());
        assert!(parse_command("sub").is_err());
        assert!(parse_command("aspect").is_err());
        assert!(parse_command("dance").is_err_and(|msg| msg.contains(":help")));
    }

    #[test]
    fn status_overlay_expires() {
        let t0 = Instant::now();
        let mut view = ViewState::default();
        view.apply(UiEvent::Status(String::from("Volume 50%")), 0, t0);
        assert_eq!(view.status_text(t0), Some("Volume 50%"));
        assert!(!view.expire_status(t0 + Duration::from_millis(100)));
        assert!(view.expire_status(t0 + STATUS_LIFETIME));
        assert_eq!(view.status_text(t0 + STATUS_LIFETIME), None);
    }

    #[test]
    fn idle_clears_the_now_playing_view() {
        let t0 = Instant::now();
        let mut view = ViewState::default();
        view.apply(UiEvent::Title(String::from("[1/1] a.mkv")), 1, t0);
        view.apply(UiEvent::Resize { width: 1920, height: 1080 }, 1, t0);
        view.apply(UiEvent::Transport { playing: true }, 1, t0);
        assert!(!view.idle);

        view.apply(UiEvent::Idle, 1, t0);
        assert!(view.idle);
        assert!(!view.playing);
        assert_eq!(view.video_size, None);
        assert_eq!(view.title, "-");
    }

    #[test]
    fn selection_is_clamped_when_the_playlist_shrinks() {
        let t0 = Instant::now();
        let mut view = ViewState::default();
        view.select_next(5);
        view.select_next(5);
        view.select_next(5);
        assert_eq!(view.selected, 3);
        view.apply(UiEvent::PlaylistChanged, 2, t0);
        assert_eq!(view.selected, 1);
        view.apply(UiEvent::PlaylistChanged, 0, t0);
        assert_eq!(view.selected, 0);
    }

    #[test]
    fn point_in_rect_respects_bounds() {
        let rect = Rect::new(2, 3, 4, 2);
        assert!(point_in_rect(2, 3, rect));
        assert!(point_in_rect(5, 4, rect));
        assert!(!point_in_rect(6, 4, rect));
        assert!(!point_in_rect(0, 0, Rect::default()));
    }
}
