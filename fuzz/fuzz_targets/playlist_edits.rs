#![no_main]

use cadre::core::{PlayerCore, SortKey};
use cadre::model::RepeatMode;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut core = PlayerCore::new(false, RepeatMode::Off);
    let len = (data.len() % 32).max(1);
    core.append((0..len).map(|idx| format!("/media/clip_{idx}.mkv")).collect());

    for pair in data.chunks(2) {
        let op = pair[0];
        let arg = usize::from(pair.get(1).copied().unwrap_or(0));
        match op % 10 {
            0 => {
                let _ = core.step(true);
            }
            1 => {
                let _ = core.step(false);
            }
            2 => core.set_shuffle(!core.shuffle.enabled),
            3 => {
                let _ = core.cycle_repeat();
            }
            4 => {
                let _ = core.remove_indices(&[arg % (core.len() + 1)]);
            }
            5 => {
                let _ = core.reorder(arg % (core.len() + 1), arg / 7);
            }
            6 => {
                let _ = core.append(vec![format!("/media/extra_{arg}.webm")]);
            }
            7 => core.sort(SortKey::Name, arg % 2 == 0, arg % 3 == 0),
            8 => {
                let media = format!("/media/clip_{}.mkv", arg % 32);
                let _ = core.record_duration(&media, arg as f64);
                core.sort(SortKey::Duration, arg % 2 == 1, false);
            }
            _ => {
                let _ = core.select(arg);
            }
        }

        match core.current_index {
            Some(idx) => assert!(idx < core.len()),
            None => assert!(core.is_empty()),
        }
        if core.shuffle.enabled {
            assert_eq!(core.shuffle.order().len(), core.len());
        }
    }
});
