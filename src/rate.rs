use crate::policy::RateControl;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Compute the xxh64 fingerprint of a raw line, used as the suppression key.
pub(crate) fn line_key(line: &str) -> u64 {
    xxhash_rust::xxh64::xxh64(line.as_bytes(), 0)
}

struct RepeatEntry {
    window_start: Instant,
    repeats: u32,
}

/// Windowed repeat counters for duplicate-message suppression.
///
/// Keys are line fingerprints, not stored strings. Entries whose window has
/// expired are pruned opportunistically so the map stays proportional to the
/// number of distinct messages seen within one window.
pub(crate) struct RepeatTracker {
    seen: HashMap<u64, RepeatEntry>,
    last_prune: Option<Instant>,
}

impl RepeatTracker {
    pub fn new() -> Self {
        RepeatTracker {
            seen: HashMap::new(),
            last_prune: None,
        }
    }

    /// Returns true when `line` should be suppressed under `control`.
    pub fn observe(&mut self, control: &RateControl, line: &str, now: Instant) -> bool {
        if !control.enabled {
            return false;
        }
        self.maybe_prune(control.window, now);

        let entry = self.seen.entry(line_key(line)).or_insert(RepeatEntry {
            window_start: now,
            repeats: 0,
        });
        if now.duration_since(entry.window_start) > control.window {
            entry.window_start = now;
            entry.repeats = 0;
        }
        entry.repeats += 1;
        entry.repeats > control.max_repeats
    }

    fn maybe_prune(&mut self, window: Duration, now: Instant) {
        let due = match self.last_prune {
            None => true,
            Some(at) => now.duration_since(at) > window,
        };
        if !due {
            return;
        }
        self.seen
            .retain(|_, entry| now.duration_since(entry.window_start) <= window);
        self.last_prune = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(max_repeats: u32) -> RateControl {
        RateControl {
            enabled: true,
            window: Duration::from_secs(1),
            max_repeats,
        }
    }

    #[test]
    fn disabled_never_suppresses() {
        let mut tracker = RepeatTracker::new();
        let off = RateControl::default();
        let now = Instant::now();
        for _ in 0..100 {
            assert!(!tracker.observe(&off, "same line", now));
        }
    }

    #[test]
    fn suppresses_after_max_repeats() {
        let mut tracker = RepeatTracker::new();
        let control = control(3);
        let now = Instant::now();

        assert!(!tracker.observe(&control, "dup", now));
        assert!(!tracker.observe(&control, "dup", now));
        assert!(!tracker.observe(&control, "dup", now));
        assert!(tracker.observe(&control, "dup", now));
        assert!(tracker.observe(&control, "dup", now));
    }

    #[test]
    fn distinct_lines_do_not_interfere() {
        let mut tracker = RepeatTracker::new();
        let control = control(1);
        let now = Instant::now();

        assert!(!tracker.observe(&control, "a", now));
        assert!(!tracker.observe(&control, "b", now));
        assert!(tracker.observe(&control, "a", now));
        assert!(tracker.observe(&control, "b", now));
    }

    #[test]
    fn window_elapse_resets_the_counter() {
        let mut tracker = RepeatTracker::new();
        let control = control(1);
        let start = Instant::now();

        assert!(!tracker.observe(&control, "dup", start));
        assert!(tracker.observe(&control, "dup", start));

        let later = start + Duration::from_millis(1500);
        assert!(!tracker.observe(&control, "dup", later));
    }
}
