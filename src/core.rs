use crate::model::RepeatMode;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Duration,
}

/// What happened to the selection after items were removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Nothing,
    Emptied,
    CurrentKept,
    /// The playing item went away; the caller should load the new selection.
    CurrentRemoved(Option<usize>),
}

/// Random play order over playlist indices.
#[derive(Debug)]
pub struct ShuffleState {
    pub enabled: bool,
    order: Vec<usize>,
    position: usize,
    rng: SmallRng,
}

impl ShuffleState {
    pub fn new(enabled: bool) -> Self {
        Self::with_rng(enabled, rand::make_rng::<SmallRng>())
    }

    pub fn seeded(enabled: bool, seed: u64) -> Self {
        Self::with_rng(enabled, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(enabled: bool, rng: SmallRng) -> Self {
        Self {
            enabled,
            order: Vec::new(),
            position: 0,
            rng,
        }
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Builds a fresh permutation of `0..size`. With `keep_current` the
    /// current item leads the order so it is not replayed straight away.
    pub fn rebuild(&mut self, size: usize, current: Option<usize>, keep_current: bool) {
        self.order = (0..size).collect();
        self.position = 0;
        if size == 0 {
            return;
        }
        self.order.shuffle(&mut self.rng);

        let current = current.filter(|idx| *idx < size);
        if keep_current && let Some(current) = current {
            self.order.retain(|idx| *idx != current);
            self.order.insert(0, current);
        }
        self.sync_to(current);
    }

    /// Points `position` at `current`; unknown indices fall back to the start.
    pub fn sync_to(&mut self, current: Option<usize>) {
        self.position = current
            .and_then(|current| self.order.iter().position(|idx| *idx == current))
            .unwrap_or(0);
    }
}

/// Computes the next (or previous) playlist index.
///
/// Returns `None` when playback should stop: an empty playlist, or the end of
/// the order with repeat off.
pub fn adjacent_index(
    current: Option<usize>,
    size: usize,
    shuffle: &mut ShuffleState,
    repeat: RepeatMode,
    forward: bool,
) -> Option<usize> {
    if size == 0 {
        return None;
    }
    let Some(current) = current else {
        return Some(0);
    };
    if repeat == RepeatMode::One {
        return Some(current);
    }

    if shuffle.enabled {
        if shuffle.order.is_empty() || shuffle.order.len() != size {
            shuffle.rebuild(size, Some(current), true);
        }
        shuffle.sync_to(Some(current));

        let len = shuffle.order.len();
        let next = if forward {
            shuffle.position.checked_add(1).filter(|pos| *pos < len)
        } else {
            shuffle.position.checked_sub(1)
        };
        let next = match (next, repeat) {
            (Some(pos), _) => pos,
            (None, RepeatMode::All) if forward => 0,
            (None, RepeatMode::All) => len - 1,
            (None, _) => return None,
        };
        shuffle.position = next;
        return shuffle.order.get(next).copied();
    }

    let next = if forward {
        current.checked_add(1).filter(|idx| *idx < size)
    } else {
        current.checked_sub(1)
    };
    match (next, repeat) {
        (Some(idx), _) => Some(idx),
        (None, RepeatMode::All) if forward => Some(0),
        (None, RepeatMode::All) => Some(size - 1),
        (None, _) => None,
    }
}

#[derive(Debug)]
pub struct PlayerCore {
    pub playlist: Vec<String>,
    /// `None` means nothing is selected.
    pub current_index: Option<usize>,
    pub shuffle: ShuffleState,
    pub repeat_mode: RepeatMode,
    durations: HashMap<String, f64>,
}

impl PlayerCore {
    pub fn new(shuffle: bool, repeat_mode: RepeatMode) -> Self {
        Self::with_shuffle(ShuffleState::new(shuffle), repeat_mode)
    }

    pub fn with_shuffle(shuffle: ShuffleState, repeat_mode: RepeatMode) -> Self {
        Self {
            playlist: Vec::new(),
            current_index: None,
            shuffle,
            repeat_mode,
            durations: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.playlist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlist.is_empty()
    }

    pub fn current_media(&self) -> Option<&str> {
        self.playlist
            .get(self.current_index?)
            .map(String::as_str)
    }

    pub fn adjacent_index(&mut self, forward: bool) -> Option<usize> {
        adjacent_index(
            self.current_index,
            self.playlist.len(),
            &mut self.shuffle,
            self.repeat_mode,
            forward,
        )
    }

    /// Moves the selection one step and returns the new index.
    pub fn step(&mut self, forward: bool) -> Option<usize> {
        let next = self.adjacent_index(forward)?;
        self.current_index = Some(next);
        Some(next)
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.playlist.len() {
            return false;
        }
        self.current_index = Some(index);
        self.shuffle.sync_to(self.current_index);
        true
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        self.shuffle.enabled = enabled;
        if enabled {
            self.rebuild_shuffle_order();
        }
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat_mode = self.repeat_mode.next();
        self.repeat_mode
    }

    /// Appends media not already present and returns what was actually added.
    pub fn append(&mut self, items: Vec<String>) -> Vec<String> {
        let mut seen: HashSet<String> = self.playlist.iter().cloned().collect();
        let added: Vec<String> = items
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect();
        if added.is_empty() {
            return added;
        }

        self.playlist.extend(added.iter().cloned());
        if self.current_index.is_none() {
            self.current_index = Some(0);
        }
        self.rebuild_shuffle_order();
        added
    }

    /// Swaps in a whole new playlist with the first item selected.
    pub fn replace(&mut self, items: Vec<String>) {
        self.playlist.clear();
        self.current_index = None;
        let _ = self.append(items);
    }

    pub fn remove_indices(&mut self, indices: &[usize]) -> Removal {
        let mut doomed: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|idx| *idx < self.playlist.len())
            .collect();
        if doomed.is_empty() {
            return Removal::Nothing;
        }
        doomed.sort_unstable();
        doomed.dedup();

        let current_removed = self
            .current_index
            .is_some_and(|current| doomed.contains(&current));
        let current_media = self.current_media().map(ToOwned::to_owned);

        for idx in doomed.into_iter().rev() {
            self.playlist.remove(idx);
        }

        let outcome = if self.playlist.is_empty() {
            self.current_index = None;
            Removal::Emptied
        } else if let Some(position) = current_media
            .as_deref()
            .filter(|_| !current_removed)
            .and_then(|media| self.position_of(media))
        {
            self.current_index = Some(position);
            Removal::CurrentKept
        } else {
            let clamped = self
                .current_index
                .map(|current| current.min(self.playlist.len() - 1));
            self.current_index = clamped;
            if current_removed {
                Removal::CurrentRemoved(clamped)
            } else {
                Removal::CurrentKept
            }
        };

        self.rebuild_shuffle_order();
        outcome
    }

    /// Moves one item, keeping the current media selected.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        if from >= self.playlist.len() || to >= self.playlist.len() || from == to {
            return false;
        }
        let current_media = self.current_media().map(ToOwned::to_owned);
        let item = self.playlist.remove(from);
        self.playlist.insert(to, item);
        self.reselect(current_media.as_deref());
        true
    }

    pub fn sort(&mut self, key: SortKey, reverse: bool, include_folders: bool) {
        if self.playlist.is_empty() {
            return;
        }
        let current_media = self.current_media().map(ToOwned::to_owned);

        match key {
            SortKey::Name => {
                self.playlist
                    .sort_by_cached_key(|item| name_sort_key(item, include_folders));
            }
            SortKey::Duration => {
                let durations = &self.durations;
                self.playlist.sort_by(|a, b| {
                    let left = durations.get(a).copied().unwrap_or(0.0);
                    let right = durations.get(b).copied().unwrap_or(0.0);
                    left.total_cmp(&right)
                });
            }
        }
        if reverse {
            self.playlist.reverse();
        }

        self.reselect(current_media.as_deref());
    }

    pub fn position_of(&self, media: &str) -> Option<usize> {
        self.playlist.iter().position(|item| item == media)
    }

    /// Records a known duration; returns true when the stored value changed.
    pub fn record_duration(&mut self, media: &str, seconds: f64) -> bool {
        if !seconds.is_finite() || seconds < 0.0 {
            return false;
        }
        match self.durations.insert(media.to_string(), seconds) {
            Some(previous) => (previous - seconds).abs() >= 0.5,
            None => true,
        }
    }

    pub fn duration_of(&self, media: &str) -> Option<f64> {
        self.durations.get(media).copied()
    }

    /// Playlist items with no known duration yet.
    pub fn unknown_durations(&self) -> Vec<String> {
        self.playlist
            .iter()
            .filter(|item| !self.durations.contains_key(*item))
            .cloned()
            .collect()
    }

    fn reselect(&mut self, media: Option<&str>) {
        self.current_index = match media {
            Some(media) => self.position_of(media),
            None => None,
        };
        self.rebuild_shuffle_order();
    }

    fn rebuild_shuffle_order(&mut self) {
        if self.shuffle.enabled {
            self.shuffle
                .rebuild(self.playlist.len(), self.current_index, true);
        }
    }
}

fn name_sort_key(item: &str, include_folders: bool) -> String {
    let raw = if include_folders {
        item
    } else {
        Path::new(item)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(item)
    };
    // Decomposed so accented names sort next to their base letter.
    raw.nfkd().collect::<String>().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert_eq;

    fn core_with(items: &[&str], current: Option<usize>, repeat: RepeatMode) -> PlayerCore {
        let mut core = PlayerCore::with_shuffle(ShuffleState::seeded(false, 7), repeat);
        core.playlist = items.iter().map(|item| item.to_string()).collect();
        core.current_index = current;
        core
    }

    #[test]
    fn repeat_all_steps_both_ways() {
        let mut core = core_with(&["A", "B", "C"], Some(1), RepeatMode::All);
        assert_eq!(core.adjacent_index(true), Some(2));
        assert_eq!(core.adjacent_index(false), Some(0));
    }

    #[test]
    fn single_item_without_repeat_stops() {
        let mut core = core_with(&["A"], Some(0), RepeatMode::Off);
        assert_eq!(core.adjacent_index(true), None);
        assert_eq!(core.adjacent_index(false), None);
    }

    #[test]
    fn empty_playlist_has_no_next() {
        let mut core = core_with(&[], None, RepeatMode::All);
        assert_eq!(core.adjacent_index(true), None);
    }

    #[test]
    fn no_selection_starts_at_first_item() {
        let mut core = core_with(&["A", "B"], None, RepeatMode::One);
        assert_eq!(core.adjacent_index(false), Some(0));
        core.set_shuffle(true);
        assert_eq!(core.adjacent_index(true), Some(0));
    }

    #[test]
    fn repeat_all_wraps_at_the_edges() {
        let mut core = core_with(&["A", "B", "C"], Some(2), RepeatMode::All);
        assert_eq!(core.adjacent_index(true), Some(0));
        core.current_index = Some(0);
        assert_eq!(core.adjacent_index(false), Some(2));
    }

    #[test]
    fn enabling_shuffle_puts_current_first() {
        let mut core = core_with(&["A", "B", "C", "D", "E"], Some(3), RepeatMode::Off);
        core.set_shuffle(true);
        assert_eq!(core.shuffle.order()[0], 3);
        assert_eq!(core.shuffle.position(), 0);
    }

    #[test]
    fn toggling_shuffle_without_selection_is_harmless() {
        let mut core = core_with(&["A", "B"], None, RepeatMode::Off);
        core.set_shuffle(true);
        core.set_shuffle(false);
        core.set_shuffle(true);
        assert_eq!(core.shuffle.order().len(), 2);
        assert_eq!(core.shuffle.position(), 0);
    }

    #[test]
    fn shuffle_resyncs_after_external_selection_change() {
        let mut core = core_with(&["A", "B", "C", "D"], Some(0), RepeatMode::Off);
        core.set_shuffle(true);
        let order = core.shuffle.order().to_vec();
        core.current_index = Some(order[2]);

        let next = core.adjacent_index(true);
        assert_eq!(next, Some(order[3]));
    }

    #[test]
    fn shuffle_without_repeat_ends_after_last_in_order() {
        let mut core = core_with(&["A", "B", "C"], Some(1), RepeatMode::Off);
        core.set_shuffle(true);
        let mut visited = vec![1];
        while let Some(next) = core.step(true) {
            visited.push(next);
        }
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 1, 2]);
    }

    #[test]
    fn corrupted_shuffle_order_is_rebuilt() {
        let mut core = core_with(&["A", "B", "C"], Some(1), RepeatMode::All);
        core.set_shuffle(true);
        core.playlist.push(String::from("D"));

        let next = core.adjacent_index(true).expect("next");
        assert!(next < 4);
        assert_eq!(core.shuffle.order().len(), 4);
    }

    #[test]
    fn append_skips_duplicates_and_selects_first() {
        let mut core = core_with(&[], None, RepeatMode::Off);
        let added = core.append(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(added, vec!["a", "b"]);
        assert_eq!(core.current_index, Some(0));

        let added = core.append(vec!["b".into(), "c".into()]);
        assert_eq!(added, vec!["c"]);
        assert_eq!(core.playlist, vec!["a", "b", "c"]);
    }

    #[test]
    fn removing_other_items_tracks_current() {
        let mut core = core_with(&["a", "b", "c", "d"], Some(2), RepeatMode::Off);
        assert_eq!(core.remove_indices(&[0, 1]), Removal::CurrentKept);
        assert_eq!(core.current_media(), Some("c"));
        assert_eq!(core.current_index, Some(0));
    }

    #[test]
    fn removing_current_clamps_and_asks_for_playback() {
        let mut core = core_with(&["a", "b", "c"], Some(2), RepeatMode::Off);
        assert_eq!(core.remove_indices(&[2]), Removal::CurrentRemoved(Some(1)));
        assert_eq!(core.current_media(), Some("b"));
    }

    #[test]
    fn removing_everything_clears_selection() {
        let mut core = core_with(&["a", "b"], Some(0), RepeatMode::Off);
        assert_eq!(core.remove_indices(&[1, 0, 5]), Removal::Emptied);
        assert_eq!(core.current_index, None);
        assert_eq!(core.remove_indices(&[0]), Removal::Nothing);
    }

    #[test]
    fn reorder_keeps_current_media() {
        let mut core = core_with(&["a", "b", "c"], Some(0), RepeatMode::Off);
        assert!(core.reorder(0, 2));
        assert_eq!(core.playlist, vec!["b", "c", "a"]);
        assert_eq!(core.current_index, Some(2));
        assert!(!core.reorder(0, 9));
    }

    #[test]
    fn sort_by_name_ignores_folders_unless_asked() {
        let mut core = core_with(&["/z/alpha.mkv", "/a/Zulu.mkv", "/m/mike.mkv"], Some(1), RepeatMode::Off);
        core.sort(SortKey::Name, false, false);
        assert_eq!(core.playlist, vec!["/z/alpha.mkv", "/m/mike.mkv", "/a/Zulu.mkv"]);
        assert_eq!(core.current_media(), Some("/a/Zulu.mkv"));

        core.sort(SortKey::Name, false, true);
        assert_eq!(core.playlist[0], "/a/Zulu.mkv");
        assert_eq!(core.current_index, Some(0));
    }

    #[test]
    fn accented_names_sort_beside_their_base_letter() {
        let mut core = core_with(&["f.mp3", "\u{e9}cole.mp3", "e.mp3"], None, RepeatMode::Off);
        core.sort(SortKey::Name, false, false);
        assert_eq!(core.playlist, vec!["e.mp3", "\u{e9}cole.mp3", "f.mp3"]);
        assert_eq!(
            name_sort_key("\u{e9}cole.mp3", false),
            name_sort_key("e\u{301}cole.mp3", false)
        );
    }

    #[test]
    fn sort_by_duration_treats_unknown_as_zero() {
        let mut core = core_with(&["long", "unknown", "short"], None, RepeatMode::Off);
        core.record_duration("long", 600.0);
        core.record_duration("short", 30.0);
        core.sort(SortKey::Duration, true, false);
        assert_eq!(core.playlist, vec!["long", "short", "unknown"]);
    }

    #[test]
    fn record_duration_reports_meaningful_changes_only() {
        let mut core = core_with(&["a"], Some(0), RepeatMode::Off);
        assert!(core.record_duration("a", 10.0));
        assert!(!core.record_duration("a", 10.2));
        assert!(core.record_duration("a", 12.0));
        assert!(!core.record_duration("a", f64::NAN));
        assert_eq!(core.unknown_durations(), Vec::<String>::new());
    }

    proptest::proptest! {
        #[test]
        fn repeat_all_cycle_returns_home(len in 1usize..40, start in 0usize..40, shuffle in proptest::bool::ANY, seed in 0u64..1000) {
            let start = start % len;
            let mut core = PlayerCore::with_shuffle(ShuffleState::seeded(false, seed), RepeatMode::All);
            core.playlist = (0..len).map(|n| format!("{n}.mkv")).collect();
            core.current_index = Some(start);
            core.set_shuffle(shuffle);

            let mut seen = HashSet::new();
            for _ in 0..len {
                let next = core.step(true).expect("repeat all never stops");
                seen.insert(next);
            }
            prop_assert_eq!(core.current_index, Some(start));
            prop_assert_eq!(seen.len(), len);
        }

        #[test]
        fn repeat_one_is_idempotent(len in 1usize..20, start in 0usize..20, moves in proptest::collection::vec(proptest::bool::ANY, 1..30), shuffle in proptest::bool::ANY) {
            let start = start % len;
            let mut core = PlayerCore::with_shuffle(ShuffleState::seeded(shuffle, 3), RepeatMode::One);
            core.playlist = (0..len).map(|n| format!("{n}")).collect();
            core.current_index = Some(start);
            for forward in moves {
                prop_assert_eq!(core.adjacent_index(forward), Some(start));
            }
        }

        #[test]
        fn selection_stays_valid_after_random_edits(ops in proptest::collection::vec((0u8..6, 0usize..12), 1..120)) {
            let mut core = PlayerCore::with_shuffle(ShuffleState::seeded(true, 11), RepeatMode::All);
            core.append((0..6).map(|n| format!("m{n}")).collect());

            for (op, arg) in ops {
                match op {
                    0 => { let _ = core.step(true); }
                    1 => { let _ = core.step(false); }
                    2 => { let _ = core.remove_indices(&[arg]); }
                    3 => { let _ = core.append(vec![format!("m{arg}")]); }
                    4 => { let _ = core.reorder(arg % core.len().max(1), (arg * 7) % core.len().max(1)); }
                    _ => core.set_shuffle(arg % 2 == 0),
                }

                match core.current_index {
                    Some(idx) => proptest::prop_assert!(idx < core.len()),
                    None => proptest::prop_assert!(core.is_empty()),
                }
                if core.shuffle.enabled {
                    let mut order = core.shuffle.order().to_vec();
                    order.sort_unstable();
                    prop_assert_eq!(order, (0..core.len()).collect::<Vec<_>>());
                }
            }
        }
    }
}
