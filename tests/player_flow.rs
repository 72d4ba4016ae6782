use anyhow::Result;
use cadre::config;
use cadre::engine::ScriptedEngine;
use cadre::model::{PersistedState, RepeatMode};
use cadre::player::{Collaborators, Player, UiEvent};
use cadre::probe::DurationProbe;
use cadre::resolver::{ResolveOptions, UrlResolver};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

struct FixedProbe(f64);

impl DurationProbe for FixedProbe {
    fn probe(&self, _path: &Path) -> Option<f64> {
        Some(self.0)
    }
}

struct NoResolver;

impl UrlResolver for NoResolver {
    fn resolve(&self, url: &str, _options: &ResolveOptions) -> Result<String> {
        anyhow::bail!("offline: {url}")
    }
}

fn player(state: PersistedState) -> Player<ScriptedEngine> {
    Player::new(
        ScriptedEngine::new(),
        state,
        Collaborators {
            probe: Arc::new(FixedProbe(90.0)),
            resolver: Arc::new(NoResolver),
            thumbnailer: None,
        },
    )
}

fn run(player: &mut Player<ScriptedEngine>, t0: Instant, from: u64, to: u64) {
    let mut ms = from;
    while ms <= to {
        player.tick(t0 + Duration::from_millis(ms));
        ms += 10;
    }
}

#[test]
fn settings_and_resume_survive_a_restart() {
    let dir = tempdir().expect("tempdir");
    let media = dir.path().join("media");
    fs::create_dir(&media).expect("mkdir");
    fs::write(media.join("b.mkv"), b"x").expect("write");
    fs::write(media.join("A.mp3"), b"x").expect("write");
    let state_file = dir.path().join("state.json");

    let t0 = Instant::now();
    let mut first = player(PersistedState::default()).with_state_file(state_file.clone());
    first.add_inputs(&[media.to_string_lossy().into_owned()], false, t0);
    assert_eq!(first.core().len(), 2);
    let playing = first.core().current_media().expect("current").to_string();
    assert!(playing.ends_with("A.mp3"));

    run(&mut first, t0, 0, 600);
    first.set_volume(30, t0 + Duration::from_millis(700));
    first.cycle_repeat();
    first.engine_mut().set_duration(Some(100.0));
    first.engine_mut().set_position(Some(40.0));
    first.shutdown();

    let saved = config::load_state_from(&state_file).expect("load");
    assert_eq!(saved.volume, 30);
    assert_eq!(saved.repeat, RepeatMode::One);
    assert_eq!(saved.resume_position(&playing), 40.0);

    let t1 = Instant::now();
    let mut second = player(saved);
    second.append(vec![playing.clone()], false, t1);
    second.engine_mut().set_duration(Some(100.0));
    run(&mut second, t1, 0, 600);
    assert_eq!(second.gateway().engine().seeks, vec![40.0]);
    assert!(second
        .drain_events()
        .contains(&UiEvent::Status(String::from("Resumed from 00:40"))));
}

#[test]
fn m3u_round_trip_through_the_player() {
    let dir = tempdir().expect("tempdir");
    let a = dir.path().join("a.mp3");
    let b = dir.path().join("b.flac");
    fs::write(&a, b"x").expect("write");
    fs::write(&b, b"x").expect("write");

    let t0 = Instant::now();
    let mut first = player(PersistedState::default());
    first.append(
        vec![
            a.to_string_lossy().into_owned(),
            b.to_string_lossy().into_owned(),
        ],
        false,
        t0,
    );
    let written = first
        .save_playlist(&dir.path().join("evening"))
        .expect("save");
    assert_eq!(written, dir.path().join("evening.m3u"));

    let mut second = player(PersistedState::default());
    let count = second.load_playlist(&written, t0).expect("load");
    assert_eq!(count, 2);
    assert_eq!(second.core().playlist, first.core().playlist);
    let events = second.drain_events();
    assert!(events.contains(&UiEvent::Status(String::from("Loaded 2 items"))));
    assert!(events.contains(&UiEvent::Transport { playing: true }));
}

#[test]
fn unresolvable_urls_are_reported_not_added() {
    let t0 = Instant::now();
    let mut player = player(PersistedState::default());
    player.add_inputs(&[String::from("https://video.test/watch?v=9")], false, t0);
    let deadline = Instant::now() + Duration::from_secs(5);
    while player.is_resolving() && Instant::now() < deadline {
        player.tick(t0);
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(player.core().is_empty());
    assert!(player
        .drain_events()
        .contains(&UiEvent::Status(String::from("Could not open 1 url(s)"))));
}
