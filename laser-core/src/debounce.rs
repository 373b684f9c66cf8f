//! Edge filtering for noisy digital inputs.

use crate::clock::Ticks;

/// Filters a raw boolean sample stream into clean rising/falling edges.
///
/// A new level is committed only after the raw sample has held for the
/// configured stable interval; faster flips are treated as noise and
/// suppressed rather than queued. [`rose`](Self::rose) and
/// [`fell`](Self::fell) are one-shot flags valid until the next
/// [`update`](Self::update).
#[derive(Clone, Debug)]
pub struct EdgeDebouncer {
    stable_interval_ms: u32,
    last_sample: bool,
    last_change: Ticks,
    stable: bool,
    rose: bool,
    fell: bool,
}

impl EdgeDebouncer {
    /// Creates a debouncer that reports low until a stable high is seen.
    pub fn new(stable_interval_ms: u32) -> Self {
        Self {
            stable_interval_ms,
            last_sample: false,
            last_change: Ticks::default(),
            stable: false,
            rose: false,
            fell: false,
        }
    }

    /// Discards pending edge state, e.g. after the watched line is swapped.
    pub fn reset(&mut self, sample: bool, now: Ticks) {
        self.last_sample = sample;
        self.last_change = now;
        self.stable = sample;
        self.rose = false;
        self.fell = false;
    }

    /// Feeds one raw sample taken at `now`.
    pub fn update(&mut self, sample: bool, now: Ticks) {
        self.rose = false;
        self.fell = false;

        if sample != self.last_sample {
            self.last_sample = sample;
            self.last_change = now;
        }

        if sample != self.stable && now.diff(self.last_change) >= self.stable_interval_ms as i32 {
            self.stable = sample;
            self.rose = sample;
            self.fell = !sample;
        }
    }

    /// Debounced line level.
    pub const fn value(&self) -> bool {
        self.stable
    }

    /// `true` for exactly one update after a debounced low-to-high edge.
    pub const fn rose(&self) -> bool {
        self.rose
    }

    /// `true` for exactly one update after a debounced high-to-low edge.
    pub const fn fell(&self) -> bool {
        self.fell
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(debouncer: &mut EdgeDebouncer, samples: &[bool]) -> (usize, usize) {
        let mut rose = 0;
        let mut fell = 0;
        for (ms, &sample) in samples.iter().enumerate() {
            debouncer.update(sample, Ticks::new(ms as u32));
            rose += usize::from(debouncer.rose());
            fell += usize::from(debouncer.fell());
        }
        (rose, fell)
    }

    #[test]
    fn commits_after_stable_interval() {
        let mut debouncer = EdgeDebouncer::new(5);
        let (rose, fell) = run(&mut debouncer, &[true; 10]);
        assert_eq!((rose, fell), (1, 0));
        assert!(debouncer.value());
    }

    #[test]
    fn suppresses_sub_interval_glitches() {
        let mut debouncer = EdgeDebouncer::new(5);
        // 3 ms bursts never hold long enough to commit.
        let samples = [true, true, true, false, false, false, true, true, true, false];
        let (rose, fell) = run(&mut debouncer, &samples);
        assert_eq!((rose, fell), (0, 0));
        assert!(!debouncer.value());
    }

    #[test]
    fn one_shot_flags_clear_on_next_update() {
        let mut debouncer = EdgeDebouncer::new(2);
        debouncer.update(true, Ticks::new(0));
        debouncer.update(true, Ticks::new(2));
        assert!(debouncer.rose());
        debouncer.update(true, Ticks::new(3));
        assert!(!debouncer.rose());
        assert!(debouncer.value());
    }

    #[test]
    fn falling_edge_reports_once() {
        let mut debouncer = EdgeDebouncer::new(2);
        let samples = [true, true, true, false, false, false, false];
        let (rose, fell) = run(&mut debouncer, &samples);
        assert_eq!((rose, fell), (1, 1));
        assert!(!debouncer.value());
    }

    #[test]
    fn reset_adopts_the_new_line_level() {
        let mut debouncer = EdgeDebouncer::new(5);
        debouncer.reset(true, Ticks::new(100));
        assert!(debouncer.value());
        assert!(!debouncer.rose());
        // The adopted level is not an edge; only a later transition is.
        debouncer.update(true, Ticks::new(101));
        assert!(!debouncer.rose());
    }
}
